//! qoiview - headless progressive QOI viewer
//!
//! Streams each file through the background decoder and copies finished rows
//! into an RGBA canvas once per frame, the way a renderer uploads a texture.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use qoiview::decoder::{AsyncDecoder, DecodeState, DecoderConfig};
use qoiview::util::rgb_conversion::blit_rows_rgba8;

/// Time between two `get` calls, one display frame at 60 Hz
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

struct Args {
    files: Vec<PathBuf>,
    export_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut files = Vec::new();
    let mut export_dir = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--export" => {
                let dir = args.next().context("--export needs a directory")?;
                export_dir = Some(PathBuf::from(dir));
            }
            "-h" | "--help" => {
                println!("usage: qoiview <file.qoi>... [--export <dir>]");
                std::process::exit(0);
            }
            _ => files.push(PathBuf::from(arg)),
        }
    }

    if files.is_empty() {
        bail!("usage: qoiview <file.qoi>... [--export <dir>]");
    }

    Ok(Args { files, export_dir })
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    if let Some(dir) = &args.export_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut decoder =
        AsyncDecoder::new(DecoderConfig::from_env()).context("Failed to spawn decode worker")?;
    log::debug!("Decoder config: {:?}", decoder.config());

    let mut shown = 0;
    for path in &args.files {
        match view(&mut decoder, path, args.export_dir.as_deref()) {
            Ok(true) => shown += 1,
            Ok(false) => {}
            // Unreadable files are dropped from the list
            Err(e) => eprintln!("Skipping {}: {:#}", path.display(), e),
        }
    }

    decoder.stop();
    log::info!("Viewed {} of {} files", shown, args.files.len());
    Ok(())
}

/// Decode one file progressively. Returns whether every row arrived.
fn view(decoder: &mut AsyncDecoder, path: &Path, export_dir: Option<&Path>) -> Result<bool> {
    let desc = decoder.prepare(path)?.desc;
    let width = desc.width as usize;
    let mut canvas = vec![0u8; width * desc.height as usize * 4];

    let start_time = Instant::now();
    decoder.start();

    let mut frames = 0usize;
    loop {
        // Sample the state first so rows decoded before completion are not lost
        let finished = decoder.state().is_finished();

        match decoder.get() {
            Some(work) => {
                blit_rows_rgba8(&mut canvas, work.data(), desc.channels, work.start, width);
                log::trace!("Frame {}: rows {:?}", frames, work.rows());
            }
            None if finished => break,
            None => {}
        }

        frames += 1;
        thread::sleep(FRAME_INTERVAL);
    }

    let state = decoder.state();
    let rows = decoder.rows_delivered();
    if let Some(task) = decoder.current() {
        log::info!(
            "{}: {:?} after {:?}, {}/{} rows in {} frames",
            task.path.display(),
            state,
            start_time.elapsed(),
            rows,
            task.desc.height,
            frames
        );
    }

    let complete = state == DecodeState::Completed && rows == desc.height as usize;
    if !complete {
        log::warn!("{} decoded only partially", path.display());
    }

    if let Some(dir) = export_dir {
        let out = export_path(dir, path);
        let image = image::RgbaImage::from_raw(desc.width, desc.height, canvas)
            .context("Canvas size does not match image dimensions")?;
        image
            .save(&out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        log::info!("Exported {}", out.display());
    }

    Ok(complete)
}

fn export_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{stem}.png"))
}
