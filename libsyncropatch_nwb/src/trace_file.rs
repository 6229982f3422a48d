use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::constants::{LEAK_DATA_FACTOR, TRACE_FILE_PREFIX};
use super::error::TraceFileError;

const BYTES_PER_SAMPLE: usize = 2;

/// How the samples of a protocol are laid out in its trace files
#[derive(Debug, Clone, Default)]
pub struct TraceLayout {
    pub n_samples: usize,
    pub leak_subtraction: bool,
    /// Current scaling factor of every well on the chip (I2DScale)
    pub scales: Vec<f64>,
    /// Wells present in the files, in file order
    pub recorded_wells: Vec<usize>,
}

impl TraceLayout {
    /// Samples stored per (sweep, cell) block
    pub fn block_samples(&self) -> usize {
        if self.leak_subtraction {
            self.n_samples * LEAK_DATA_FACTOR
        } else {
            self.n_samples
        }
    }

    pub fn block_bytes(&self) -> u64 {
        (self.block_samples() * BYTES_PER_SAMPLE) as u64
    }

    /// Bytes of one sweep, i.e. one block for every recorded cell
    pub fn sweep_bytes(&self) -> u64 {
        self.block_bytes() * self.recorded_wells.len() as u64
    }

    fn check(&self) -> Result<(), TraceFileError> {
        if self.n_samples == 0 {
            return Err(TraceFileError::BadLayout(String::from(
                "number of samples is zero",
            )));
        }
        if self.recorded_wells.is_empty() {
            return Err(TraceFileError::BadLayout(String::from("no recorded wells")));
        }
        if let Some(well) = self
            .recorded_wells
            .iter()
            .find(|well| **well >= self.scales.len())
        {
            return Err(TraceFileError::BadLayout(format!(
                "recorded well {well} has no scaling factor"
            )));
        }
        Ok(())
    }
}

/// One decoded (sweep, cell) block of a trace file
#[derive(Debug, Clone)]
pub struct TraceBlock {
    pub sweep: usize,
    pub cell: usize,
    pub samples: Vec<f64>,
    pub leak: Option<Vec<f64>>,
}

/// A single binary trace file, held in memory.
///
/// The file is a flat run of i16 little-endian samples, in blocks of n_samples (twice
/// that in leak-subtraction mode) ordered sweep first, then recorded cell.
#[derive(Debug)]
pub struct TraceFile {
    path: PathBuf,
    data: Vec<i16>,
    layout: TraceLayout,
    sweep_offset: usize,
}

impl TraceFile {
    /// Load a trace file. Sweep indices of its blocks start at sweep_offset
    pub fn open(
        path: &Path,
        layout: &TraceLayout,
        sweep_offset: usize,
    ) -> Result<Self, TraceFileError> {
        if !path.exists() {
            return Err(TraceFileError::BadFilePath(path.to_path_buf()));
        }
        layout.check()?;
        let bytes = std::fs::read(path)?;
        log::info!(
            "Loaded trace file {} ({} in memory)",
            path.file_name().unwrap_or_default().to_string_lossy(),
            human_bytes::human_bytes(bytes.len() as f64)
        );
        Self::from_bytes(path, &bytes, layout, sweep_offset)
    }

    /// Decode an in-memory buffer
    pub fn from_bytes(
        path: &Path,
        bytes: &[u8],
        layout: &TraceLayout,
        sweep_offset: usize,
    ) -> Result<Self, TraceFileError> {
        layout.check()?;
        let len = bytes.len() as u64;
        if len % layout.block_bytes() != 0 {
            return Err(TraceFileError::BadFileLength {
                path: path.to_path_buf(),
                len,
                block: layout.block_bytes(),
            });
        }
        // A file holding only part of a sweep would shift every later block
        if len % layout.sweep_bytes() != 0 {
            return Err(TraceFileError::BadFileLength {
                path: path.to_path_buf(),
                len,
                block: layout.sweep_bytes(),
            });
        }
        let mut data = vec![0i16; bytes.len() / BYTES_PER_SAMPLE];
        LittleEndian::read_i16_into(bytes, &mut data);
        Ok(Self {
            path: path.to_path_buf(),
            data,
            layout: layout.clone(),
            sweep_offset,
        })
    }

    pub fn n_sweeps(&self) -> usize {
        self.data.len() / (self.layout.block_samples() * self.layout.recorded_wells.len())
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Iterate over the scaled blocks of the file
    pub fn blocks(&self) -> TraceBlocks<'_> {
        TraceBlocks {
            file: self,
            position: 0,
        }
    }
}

/// Iterator over the blocks of a TraceFile
pub struct TraceBlocks<'a> {
    file: &'a TraceFile,
    position: usize,
}

impl Iterator for TraceBlocks<'_> {
    type Item = TraceBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let layout = &self.file.layout;
        let n_cells = layout.recorded_wells.len();
        let block_samples = layout.block_samples();
        let start = self.position * block_samples;
        if start + block_samples > self.file.data.len() {
            return None;
        }
        let sweep = self.position / n_cells;
        let cell = self.position % n_cells;
        let scale = layout.scales[layout.recorded_wells[cell]];
        let scaled =
            |raw: &[i16]| -> Vec<f64> { raw.iter().map(|s| *s as f64 * scale).collect() };

        let signal_end = start + layout.n_samples;
        let samples = scaled(&self.file.data[start..signal_end]);
        let leak = if layout.leak_subtraction {
            Some(scaled(&self.file.data[signal_end..(start + block_samples)]))
        } else {
            None
        };
        self.position += 1;
        Some(TraceBlock {
            sweep: self.file.sweep_offset + sweep,
            cell,
            samples,
            leak,
        })
    }
}

/// The ordered collection of trace files of one protocol.
///
/// Files are read one at a time; each file's sweeps continue where the previous file stopped.
#[derive(Debug)]
pub struct TraceStack {
    file_stack: VecDeque<PathBuf>,
    layout: TraceLayout,
    sweeps_read: usize,
    pub total_stack_size_bytes: u64,
}

impl TraceStack {
    /// Create a TraceStack from the file names listed in a protocol header
    pub fn new(
        protocol_dir: &Path,
        file_list: &[String],
        layout: &TraceLayout,
    ) -> Result<Self, TraceFileError> {
        let mut names: Vec<&String> = file_list.iter().collect();
        names.sort_by_key(|name| trace_file_order(name));
        let mut stack = VecDeque::new();
        let mut total_stack_size_bytes = 0;
        for name in names {
            let path = protocol_dir.join(name);
            if !path.exists() {
                return Err(TraceFileError::BadFilePath(path));
            }
            total_stack_size_bytes += path.metadata()?.len();
            stack.push_back(path);
        }
        Ok(Self {
            file_stack: stack,
            layout: layout.clone(),
            sweeps_read: 0,
            total_stack_size_bytes,
        })
    }

    /// Load the next file of the stack. Returns None once every file was read
    pub fn next_file(&mut self) -> Result<Option<TraceFile>, TraceFileError> {
        if let Some(path) = self.file_stack.pop_front() {
            let file = TraceFile::open(&path, &self.layout, self.sweeps_read)?;
            self.sweeps_read += file.n_sweeps();
            Ok(Some(file))
        } else {
            Ok(None)
        }
    }

    pub fn get_sweeps_read(&self) -> usize {
        self.sweeps_read
    }
}

/// Sort key of a trace file: its numeric index when it has one, then its name
fn trace_file_order(name: &str) -> (u64, String) {
    let index = name
        .strip_prefix(TRACE_FILE_PREFIX)
        .unwrap_or(name)
        .split('.')
        .next()
        .and_then(|stem| stem.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (index, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(values: &[i16]) -> Vec<u8> {
        let mut bytes = vec![0u8; values.len() * 2];
        LittleEndian::write_i16_into(values, &mut bytes);
        bytes
    }

    fn layout(n_samples: usize, leak: bool) -> TraceLayout {
        TraceLayout {
            n_samples,
            leak_subtraction: leak,
            scales: vec![1.0, 0.0, 2.0, 0.5],
            recorded_wells: vec![0, 2],
        }
    }

    #[test]
    fn test_block_order_and_scaling() {
        // 2 sweeps x 2 cells x 3 samples
        let values: Vec<i16> = (0..12).collect();
        let file =
            TraceFile::from_bytes(Path::new("t.dat"), &encode(&values), &layout(3, false), 4)
                .unwrap();
        assert_eq!(file.n_sweeps(), 2);
        let blocks: Vec<TraceBlock> = file.blocks().collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!((blocks[0].sweep, blocks[0].cell), (4, 0));
        assert_eq!(blocks[0].samples, vec![0.0, 1.0, 2.0]);
        assert_eq!((blocks[1].sweep, blocks[1].cell), (4, 1));
        assert_eq!(blocks[1].samples, vec![6.0, 8.0, 10.0]);
        assert_eq!((blocks[3].sweep, blocks[3].cell), (5, 1));
        assert_eq!(blocks[3].samples, vec![18.0, 20.0, 22.0]);
        assert!(blocks.iter().all(|b| b.leak.is_none()));
    }

    #[test]
    fn test_leak_blocks() {
        // 1 sweep x 2 cells x (2 signal + 2 leak) samples
        let values: Vec<i16> = vec![1, 2, -1, -2, 3, 4, -3, -4];
        let file =
            TraceFile::from_bytes(Path::new("t.dat"), &encode(&values), &layout(2, true), 0)
                .unwrap();
        let blocks: Vec<TraceBlock> = file.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].samples, vec![1.0, 2.0]);
        assert_eq!(blocks[0].leak, Some(vec![-1.0, -2.0]));
        assert_eq!(blocks[1].samples, vec![6.0, 8.0]);
        assert_eq!(blocks[1].leak, Some(vec![-6.0, -8.0]));
    }

    #[test]
    fn test_bad_length_is_rejected() {
        // An odd number of bytes is never a whole block
        let mut bytes = encode(&[1, 2, 3, 4, 5, 6]);
        bytes.push(0);
        let result = TraceFile::from_bytes(Path::new("t.dat"), &bytes, &layout(3, false), 0);
        assert!(matches!(result, Err(TraceFileError::BadFileLength { .. })));

        // Whole blocks but only half of a sweep
        let bytes = encode(&[1, 2, 3]);
        let result = TraceFile::from_bytes(Path::new("t.dat"), &bytes, &layout(3, false), 0);
        assert!(matches!(result, Err(TraceFileError::BadFileLength { .. })));

        // Leak mode doubles the block size
        let bytes = encode(&[1, 2, 3, 4, 5, 6]);
        let result = TraceFile::from_bytes(Path::new("t.dat"), &bytes, &layout(3, true), 0);
        assert!(matches!(result, Err(TraceFileError::BadFileLength { .. })));
    }

    #[test]
    fn test_stack_offsets_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(2, false);
        // one sweep per file
        std::fs::write(dir.path().join("Tracedata_10.dat"), encode(&[9, 9, 9, 9])).unwrap();
        std::fs::write(dir.path().join("Tracedata_2.dat"), encode(&[1, 1, 1, 1])).unwrap();
        let files = vec![
            String::from("Tracedata_10.dat"),
            String::from("Tracedata_2.dat"),
        ];
        let mut stack = TraceStack::new(dir.path(), &files, &layout).unwrap();
        assert_eq!(stack.total_stack_size_bytes, 16);

        let first = stack.next_file().unwrap().unwrap();
        assert!(first.get_path().ends_with("Tracedata_2.dat"));
        assert_eq!(first.blocks().next().unwrap().sweep, 0);
        let second = stack.next_file().unwrap().unwrap();
        assert!(second.get_path().ends_with("Tracedata_10.dat"));
        assert_eq!(second.blocks().next().unwrap().sweep, 1);
        assert!(stack.next_file().unwrap().is_none());
        assert_eq!(stack.get_sweeps_read(), 2);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = TraceStack::new(
            dir.path(),
            &[String::from("Tracedata_0.dat")],
            &layout(2, false),
        );
        assert!(matches!(result, Err(TraceFileError::BadFilePath(_))));
    }
}
