//! WAV recording of the captured stream
//!
//! The recorder runs on the UI tick, never on the audio thread. Writes go
//! through hound's buffered writer; the RIFF header is written when the file
//! is created and its length fields are patched on `close`.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use super::buffer::Sample;
use crate::error::PersistError;

/// Layout of the recorded file: mono 16-bit PCM at the capture rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFormat {
    pub sample_rate: u32,
}

impl RecordingFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: Self::BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Where the encoded WAV bytes go. hound patches the header on close, so the
/// sink must be seekable.
pub trait RecordSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> RecordSink for T {}

/// An open-or-closed WAV file plus a count of what went into it
pub struct WavRecorder {
    path: PathBuf,
    writer: Option<hound::WavWriter<Box<dyn RecordSink>>>,
    samples_written: u64,
}

impl WavRecorder {
    /// Create (or truncate) `path` and write the WAV header
    pub fn open(path: impl AsRef<Path>, format: RecordingFormat) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(File::create(&path)?);
        let recorder = Self::with_sink(file, path, format)?;
        log::info!(
            "Recording to {} ({} Hz, mono, {}-bit)",
            recorder.path.display(),
            format.sample_rate,
            RecordingFormat::BITS_PER_SAMPLE
        );
        Ok(recorder)
    }

    /// Record into any seekable sink; `path` only names it in logs and stats
    pub fn with_sink(
        sink: impl RecordSink + 'static,
        path: PathBuf,
        format: RecordingFormat,
    ) -> Result<Self, PersistError> {
        let sink: Box<dyn RecordSink> = Box::new(sink);
        let mut writer = hound::WavWriter::new(sink, format.spec())?;
        writer.flush()?;

        Ok(Self {
            path,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    /// Append samples in arrival order
    pub fn write(&mut self, samples: &[Sample]) -> Result<(), PersistError> {
        let writer = self.writer.as_mut().ok_or(PersistError::Closed)?;
        for &sample in samples {
            writer.write_sample(sample)?;
            self.samples_written += 1;
        }
        Ok(())
    }

    /// Flush, patch the header and release the file
    ///
    /// Closing an already-closed recorder does nothing.
    pub fn close(&mut self) -> Result<(), PersistError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        writer.finalize()?;
        log::info!(
            "Recording closed: {} ({} samples)",
            self.path.display(),
            self.samples_written
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::io::{self, Cursor, SeekFrom};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use symphonia::core::audio::{AudioBufferRef, Signal};
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    /// Decode a mono 16-bit WAV with symphonia, independently of hound
    pub(crate) fn decode_wav(path: &Path) -> (u32, Vec<Sample>) {
        let file = File::open(path).unwrap();
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("wav");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .unwrap();
        let mut format = probed.format;
        let track = format.default_track().unwrap();
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap();
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .unwrap();

        let mut samples = Vec::new();
        while let Ok(packet) = format.next_packet() {
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet).unwrap() {
                AudioBufferRef::S16(buf) => samples.extend_from_slice(buf.chan(0)),
                other => panic!("unexpected sample format: {:?}", other.spec()),
            }
        }
        (sample_rate, samples)
    }

    /// In-memory sink whose writes start failing once its switch is set
    pub(crate) struct FlakySink {
        inner: Cursor<Vec<u8>>,
        fail: Arc<AtomicBool>,
    }

    impl FlakySink {
        pub(crate) fn new() -> (Self, Arc<AtomicBool>) {
            let fail = Arc::new(AtomicBool::new(false));
            let sink = Self {
                inner: Cursor::new(Vec::new()),
                fail: Arc::clone(&fail),
            };
            (sink, fail)
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(io::Error::other("disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_sink_failure_surfaces_from_write() {
        let (sink, fail) = FlakySink::new();
        let mut recorder =
            WavRecorder::with_sink(sink, PathBuf::from("flaky.wav"), RecordingFormat::new(8000))
                .unwrap();

        recorder.write(&[1, 2, 3]).unwrap();
        fail.store(true, Ordering::Relaxed);

        let err = recorder.write(&[4, 5]).unwrap_err();
        assert!(matches!(err, PersistError::Wav(_) | PersistError::Io(_)));
        assert_eq!(recorder.samples_written(), 3);
    }

    #[test]
    fn test_header_written_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let _recorder = WavRecorder::open(&path, RecordingFormat::new(8000)).unwrap();
        assert!(fs::metadata(&path).unwrap().len() >= 44);
    }

    #[test]
    fn test_samples_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");

        let mut recorder = WavRecorder::open(&path, RecordingFormat::new(8000)).unwrap();
        recorder.write(&[0, 1, 2, 3]).unwrap();
        recorder.write(&[-4, i16::MIN, i16::MAX]).unwrap();
        assert_eq!(recorder.samples_written(), 7);
        recorder.close().unwrap();

        let (rate, samples) = decode_wav(&path);
        assert_eq!(rate, 8000);
        assert_eq!(samples, vec![0, 1, 2, 3, -4, i16::MIN, i16::MAX]);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 7);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
    }

    #[test]
    fn test_close_twice_matches_close_once() {
        let dir = tempfile::tempdir().unwrap();
        let once = dir.path().join("once.wav");
        let twice = dir.path().join("twice.wav");

        let mut a = WavRecorder::open(&once, RecordingFormat::new(48000)).unwrap();
        a.write(&[10, 20, 30]).unwrap();
        a.close().unwrap();

        let mut b = WavRecorder::open(&twice, RecordingFormat::new(48000)).unwrap();
        b.write(&[10, 20, 30]).unwrap();
        b.close().unwrap();
        b.close().unwrap();
        drop(b);

        assert!(matches!(a.write(&[1]), Err(PersistError::Closed)));
        assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            WavRecorder::open(dir.path().join("closed.wav"), RecordingFormat::new(8000)).unwrap();
        recorder.close().unwrap();

        assert!(matches!(recorder.write(&[1]), Err(PersistError::Closed)));
        assert_eq!(recorder.samples_written(), 0);
    }

    #[test]
    fn test_drop_finalizes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.wav");
        {
            let mut recorder = WavRecorder::open(&path, RecordingFormat::new(8000)).unwrap();
            recorder.write(&[5; 100]).unwrap();
        }

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 100);
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/take.wav");

        let err = WavRecorder::open(&path, RecordingFormat::new(8000)).err().unwrap();
        assert!(matches!(err, PersistError::Wav(_) | PersistError::Io(_)));
    }
}
