//! Reader and writer for the `.sim` trajectory format.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! f32 container_radius
//! i32 N
//! N x (f32 mass, f32 radius)
//! until EOF:
//!     i32 step, f32 time
//!     N x (f32 x, f32 y, f32 vx, f32 vy)
//! ```
//!
//! There is no version field and no checksum. Simulators may be killed while
//! writing, so a short trailing record marks the end of the stream.

use log::{debug, info, trace, warn};
use sim_common::{
    AnalysisError, ContainerGeometry, ParticleProperties, ParticleState, Result, Snapshot, Trajectory, Vec2,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use zerocopy::byteorder::little_endian::{F32, I32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

const HEADER_SIZE: usize = 8;
const PROPERTIES_SIZE: usize = 8;
const RECORD_HEADER_SIZE: usize = 8;
const PARTICLE_SIZE: usize = 16;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WireHeader {
    container_radius: F32,
    particle_count: I32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WireProperties {
    mass: F32,
    radius: F32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WireRecordHeader {
    step: I32,
    time: F32,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WireParticle {
    x: F32,
    y: F32,
    vx: F32,
    vy: F32,
}

/// Size in bytes of one snapshot record for `n` particles.
pub fn record_size(n: usize) -> usize {
    RECORD_HEADER_SIZE + PARTICLE_SIZE * n
}

/// Size in bytes of the header for `n` particles.
pub fn header_size(n: usize) -> usize {
    HEADER_SIZE + PROPERTIES_SIZE * n
}

/// Fills `buf` as far as the reader allows. Returns the number of bytes read,
/// which is only short of `buf.len()` at end of stream.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Forward-only decoder over a byte source. The header is read on construction;
/// iterating yields one snapshot per complete record.
pub struct SimReader<R> {
    reader: R,
    geometry: ContainerGeometry,
    properties: Vec<ParticleProperties>,
    record: Vec<u8>,
    records_read: usize,
    finished: bool,
}

impl<R: Read> SimReader<R> {
    /// Reads and validates the header.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        let got = read_up_to(&mut reader, &mut header_bytes)?;
        if got < HEADER_SIZE {
            return Err(AnalysisError::malformed(format!(
                "header needs {} bytes, stream holds {}",
                HEADER_SIZE, got
            )));
        }
        let header = WireHeader::read_from_bytes(&header_bytes[..])
            .map_err(|_| AnalysisError::malformed("header layout mismatch"))?;
        let container_radius = header.container_radius.get();
        let n = header.particle_count.get();
        if n < 0 {
            return Err(AnalysisError::malformed(format!("negative particle count {}", n)));
        }
        let n = n as usize;

        // Read through `take` so a corrupted count cannot force a huge allocation up front.
        let expected = PROPERTIES_SIZE * n;
        let mut table = Vec::new();
        reader.by_ref().take(expected as u64).read_to_end(&mut table)?;
        if table.len() < expected {
            return Err(AnalysisError::malformed(format!(
                "properties table for {} particles needs {} bytes, stream holds {}",
                n,
                expected,
                table.len()
            )));
        }
        let wire = <[WireProperties]>::ref_from_bytes(&table[..])
            .map_err(|_| AnalysisError::malformed("properties table layout mismatch"))?;
        let properties: Vec<ParticleProperties> = wire
            .iter()
            .map(|p| ParticleProperties { mass: p.mass.get(), radius: p.radius.get() })
            .collect();

        debug!("Header: container_radius={} N={}", container_radius, n);

        Ok(SimReader {
            reader,
            geometry: ContainerGeometry { radius: container_radius },
            properties,
            record: vec![0u8; record_size(n)],
            records_read: 0,
            finished: false,
        })
    }

    pub fn geometry(&self) -> ContainerGeometry {
        self.geometry
    }

    pub fn properties(&self) -> &[ParticleProperties] {
        &self.properties
    }

    pub fn particle_count(&self) -> usize {
        self.properties.len()
    }

    /// Drains the remaining records into a [`Trajectory`].
    pub fn into_trajectory(mut self) -> Result<Trajectory> {
        let mut snapshots = Vec::new();
        for snapshot in self.by_ref() {
            snapshots.push(snapshot?);
        }
        Ok(Trajectory { geometry: self.geometry, properties: self.properties, snapshots })
    }

    fn read_record(&mut self) -> Result<Option<Snapshot>> {
        let got = read_up_to(&mut self.reader, &mut self.record)?;
        if got < self.record.len() {
            if got > 0 {
                warn!(
                    "Dropping partial trailing record after {} snapshots ({} of {} bytes).",
                    self.records_read,
                    got,
                    self.record.len()
                );
            }
            return Ok(None);
        }

        let (head, body) = WireRecordHeader::read_from_prefix(&self.record[..])
            .map_err(|_| AnalysisError::malformed("record header layout mismatch"))?;
        let wire = <[WireParticle]>::ref_from_bytes(body)
            .map_err(|_| AnalysisError::malformed("record body layout mismatch"))?;

        let particles = wire
            .iter()
            .map(|p| ParticleState {
                position: Vec2::new(p.x.get(), p.y.get()),
                velocity: Vec2::new(p.vx.get(), p.vy.get()),
            })
            .collect();

        self.records_read += 1;
        let snapshot = Snapshot { step: head.step.get(), time: head.time.get(), particles };
        trace!("Decoded step {} at t={}", snapshot.step, snapshot.time);
        Ok(Some(snapshot))
    }
}

impl<R: Read> Iterator for SimReader<R> {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(snapshot)) => Some(Ok(snapshot)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A valid file holds at least one snapshot.
fn non_empty(trajectory: Trajectory) -> Result<Trajectory> {
    if trajectory.snapshots.is_empty() {
        return Err(AnalysisError::insufficient("file contains a header but no complete snapshot"));
    }
    Ok(trajectory)
}

/// Decodes a whole `.sim` buffer held in memory.
pub fn decode(bytes: &[u8]) -> Result<Trajectory> {
    non_empty(SimReader::new(bytes)?.into_trajectory()?)
}

/// Opens and decodes a `.sim` file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Trajectory> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AnalysisError::MissingInputFile { path: path.to_path_buf() },
        _ => AnalysisError::Io(e),
    })?;
    let trajectory = non_empty(SimReader::new(BufReader::new(file))?.into_trajectory()?)?;
    info!(
        "Loaded {} with {} particles, {} snapshots and duration {:.4} s",
        path.display(),
        trajectory.particle_count(),
        trajectory.snapshot_count(),
        trajectory.duration()
    );
    Ok(trajectory)
}

/// Encoder for the same layout. Writes the header on construction.
pub struct SimWriter<W: Write> {
    writer: W,
    particle_count: usize,
}

impl<W: Write> SimWriter<W> {
    pub fn new(mut writer: W, geometry: ContainerGeometry, properties: &[ParticleProperties]) -> Result<Self> {
        let n = i32::try_from(properties.len())
            .map_err(|_| AnalysisError::InvalidParameter(format!("{} particles do not fit an i32", properties.len())))?;
        let header = WireHeader { container_radius: F32::new(geometry.radius), particle_count: I32::new(n) };
        writer.write_all(header.as_bytes())?;
        for p in properties {
            let wire = WireProperties { mass: F32::new(p.mass), radius: F32::new(p.radius) };
            writer.write_all(wire.as_bytes())?;
        }
        Ok(SimWriter { writer, particle_count: properties.len() })
    }

    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.particles.len() != self.particle_count {
            return Err(AnalysisError::InvalidParameter(format!(
                "snapshot at step {} has {} particles, file header declares {}",
                snapshot.step,
                snapshot.particles.len(),
                self.particle_count
            )));
        }
        let head = WireRecordHeader { step: I32::new(snapshot.step), time: F32::new(snapshot.time) };
        self.writer.write_all(head.as_bytes())?;
        for p in &snapshot.particles {
            let wire = WireParticle {
                x: F32::new(p.position.x),
                y: F32::new(p.position.y),
                vx: F32::new(p.velocity.x),
                vy: F32::new(p.velocity.y),
            };
            self.writer.write_all(wire.as_bytes())?;
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Encodes a whole trajectory into a fresh buffer.
pub fn encode(trajectory: &Trajectory) -> Result<Vec<u8>> {
    let capacity = header_size(trajectory.particle_count())
        + trajectory.snapshot_count() * record_size(trajectory.particle_count());
    let mut writer = SimWriter::new(Vec::with_capacity(capacity), trajectory.geometry, &trajectory.properties)?;
    for snapshot in &trajectory.snapshots {
        writer.write_snapshot(snapshot)?;
    }
    writer.into_inner()
}

/// Writes a trajectory to `path`.
pub fn save<P: AsRef<Path>>(path: P, trajectory: &Trajectory) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = SimWriter::new(BufWriter::new(file), trajectory.geometry, &trajectory.properties)?;
    for snapshot in &trajectory.snapshots {
        writer.write_snapshot(snapshot)?;
    }
    writer.into_inner()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_trajectory(snapshots: usize) -> Trajectory {
        let properties = vec![
            ParticleProperties { mass: 1.0, radius: 0.0005 },
            ParticleProperties { mass: 3.5, radius: 0.001 },
            ParticleProperties { mass: f32::MIN_POSITIVE, radius: 0.25 },
        ];
        let snapshots = (0..snapshots)
            .map(|s| Snapshot {
                step: s as i32 * 7,
                time: s as f32 * 0.013,
                particles: (0..3)
                    .map(|i| {
                        let f = (s * 3 + i) as f32;
                        ParticleState::new(0.01 * f, -0.02 * f, 1.0 / (f + 1.0), -f.sqrt())
                    })
                    .collect(),
            })
            .collect();
        Trajectory { geometry: ContainerGeometry { radius: 0.05 }, properties, snapshots }
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let original = sample_trajectory(5);
        let bytes = encode(&original).unwrap();
        assert_eq!(bytes.len(), header_size(3) + 5 * record_size(3));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
        for (a, b) in decoded.snapshots.iter().zip(&original.snapshots) {
            for (pa, pb) in a.particles.iter().zip(&b.particles) {
                assert_eq!(pa.velocity.y.to_bits(), pb.velocity.y.to_bits());
            }
        }
    }

    #[test]
    fn layout_is_little_endian_and_positional() {
        let bytes = encode(&sample_trajectory(1)).unwrap();
        assert_eq!(&bytes[0..4], &0.05f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
        let record = header_size(3);
        assert_eq!(&bytes[record..record + 4], &0i32.to_le_bytes());
    }

    #[test]
    fn short_header_is_malformed() {
        for len in 0..HEADER_SIZE {
            let bytes = vec![0u8; len];
            assert!(matches!(decode(&bytes), Err(AnalysisError::MalformedHeader { .. })), "len {}", len);
        }
    }

    #[test]
    fn negative_count_and_short_properties_are_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&(-2i32).to_le_bytes());
        assert!(matches!(decode(&bytes), Err(AnalysisError::MalformedHeader { .. })));

        let full = encode(&sample_trajectory(0)).unwrap();
        assert!(matches!(decode(&full[..full.len() - 1]), Err(AnalysisError::MalformedHeader { .. })));
    }

    #[test]
    fn header_only_file_is_insufficient() {
        let bytes = encode(&sample_trajectory(0)).unwrap();
        assert!(matches!(decode(&bytes), Err(AnalysisError::InsufficientData { .. })));
        // The streaming reader still accepts it.
        let reader = SimReader::new(&bytes[..]).unwrap();
        assert_eq!(reader.particle_count(), 3);
        assert!(reader.into_trajectory().unwrap().snapshots.is_empty());
    }

    #[test]
    fn writer_rejects_wrong_particle_count() {
        let traj = sample_trajectory(1);
        let mut writer = SimWriter::new(Vec::new(), traj.geometry, &traj.properties[..2]).unwrap();
        assert!(writer.write_snapshot(&traj.snapshots[0]).is_err());
    }

    #[test]
    fn missing_file_is_reported_as_such() {
        let path = std::env::temp_dir().join("sim_analysis_decoder_does_not_exist.sim");
        assert!(matches!(load(&path), Err(AnalysisError::MissingInputFile { .. })));
    }

    #[test]
    fn save_then_load_from_disk() {
        let path = std::env::temp_dir().join("sim_analysis_decoder_save_load.sim");
        let original = sample_trajectory(4);
        save(&path, &original).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, original);
        let _ = std::fs::remove_file(&path);
    }

    proptest! {
        #[test]
        fn truncation_inside_a_record_keeps_prior_snapshots(cut in 1usize..record_size(3), complete in 1usize..4) {
            let original = sample_trajectory(5);
            let bytes = encode(&original).unwrap();
            let end = header_size(3) + complete * record_size(3) + cut;
            let decoded = decode(&bytes[..end]).unwrap();
            prop_assert_eq!(decoded.snapshots.len(), complete);
            prop_assert_eq!(&decoded.snapshots[..], &original.snapshots[..complete]);
        }
    }
}
