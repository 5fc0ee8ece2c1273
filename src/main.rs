mod calibrate;
mod calibration;
mod camera;
mod capture;
mod config;
mod error;
mod locate;
mod pieces;
mod prepare;
mod publish;
mod rectify;
mod segment;
mod undistort;

use anyhow::{Context, Result};
use calibrate::TerminalPicker;
use calibration::{CalibrationContext, CornerSlot};
use capture::{CaptureMode, DebugWriter};
use clap::{Arg, ArgAction, Command};
use config::{PipelineConfig, DEFAULT_CONFIG_FILE};
use dialoguer::Confirm;
use locate::ObjectLocator;
use log::{debug, info};
use pieces::PieceColor;
use prepare::FramePreparer;
use publish::CoordinatePublisher;
use segment::ColorSegmenter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use undistort::Undistorter;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse CLI arguments
    let matches = Command::new("checkers-vision")
        .version("0.1.0")
        .about("Detects checkers pieces on a calibrated board and publishes their coordinates")
        .arg(
            Arg::new("mode")
                .value_name("MODE")
                .help("Frame source: live spool file, recorded video, or live while recording")
                .default_value("live")
                .value_parser(["record", "video", "live"]),
        )
        .arg(
            Arg::new("demo")
                .value_name("DEMO")
                .help("Pass `demo` to write debug images every frame")
                .value_parser(["demo"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file (default: checkers_config.json if present)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("max-frames")
                .long("max-frames")
                .value_name("N")
                .help("Stop after N frames")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("save-config")
                .long("save-config")
                .help("Write the effective config to checkers_config.json and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mode: CaptureMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("live")
        .parse()?;
    let demo = matches.get_one::<String>("demo").is_some();
    let max_frames = matches.get_one::<u64>("max-frames").copied();

    let config = PipelineConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .context("Failed to load config")?;
    if matches.get_flag("save-config") {
        config
            .save_json_file(Path::new(DEFAULT_CONFIG_FILE))
            .context("Failed to write config")?;
        println!("Wrote {}", DEFAULT_CONFIG_FILE);
        return Ok(());
    }

    let mut ctx = CalibrationContext::load(&config.paths)
        .context("Failed to load calibration data")?;
    let mut source = capture::open_source(mode, &config.capture)
        .with_context(|| format!("Failed to open {} frame source", mode))?;

    // Step 1: Optional board corner calibration on an undistorted frame
    let recalibrate = Confirm::new()
        .with_prompt("Calibration not needed if setup has not changed. Calibrate board?")
        .default(ctx.corners.is_none())
        .interact()
        .context("Failed to read calibration answer")?;
    if recalibrate {
        let frame = source
            .next_frame()
            .context("Failed to read calibration frame")?
            .context("Frame source ended before calibration")?;
        let undistorted = Undistorter::new(&ctx.camera, ctx.frame_size)
            .and_then(|u| u.undistort(&frame))
            .context("Failed to undistort calibration frame")?;

        let mut picker = TerminalPicker::new(&config.calibrator.prompt_dir);
        let corners =
            calibrate::run_corner_calibration(&mut picker, undistorted, &config.calibrator)
                .context("Corner calibration failed")?;

        let overwrite = Confirm::new()
            .with_prompt(format!("Overwrite {}?", config.paths.board_corners.display()))
            .default(true)
            .interact()
            .context("Failed to read overwrite answer")?;
        if overwrite {
            corners
                .save(&config.paths.board_corners)
                .context("Failed to save board corners")?;
            info!("Saved board corners to {}", config.paths.board_corners.display());
        }
        ctx = ctx.with_corners(corners);
    }

    // Step 2: Build the per-frame stages
    let preparer = FramePreparer::new(&ctx, &config.board)
        .context("Cannot prepare frames; calibrate the board corners first")?;
    let roi = preparer.undistorter().roi();
    info!(
        "Undistorted {}x{} (roi at {},{}) -> normalized {}x{}",
        roi.width,
        roi.height,
        roi.x,
        roi.y,
        preparer.side(),
        preparer.side()
    );
    debug!("New camera matrix: {}", preparer.undistorter().new_camera_matrix());
    if let Some(corners) = &ctx.corners {
        for slot in CornerSlot::ALL {
            let mapped = preparer.rectifier().map_point(corners.get(slot));
            debug!("{} corner maps to ({:.1}, {:.1})", slot, mapped.x, mapped.y);
        }
    }

    let segmenter = ColorSegmenter::new(config.segmentation.clone());
    let locator = ObjectLocator::new(config.locator.clone(), config.board.clone());
    let debug_out = if demo || capture::debug_capture_enabled() {
        Some(DebugWriter::new(&config.paths.debug_dir).context("Failed to create debug directory")?)
    } else {
        None
    };

    let publisher = CoordinatePublisher::new(&config.paths.pieces_file);
    if let Ok((black, white)) = publish::parse_published(publisher.path()) {
        debug!(
            "Previous run left {} black / {} white",
            black.found_count(),
            white.found_count()
        );
    }
    publisher
        .initialize()
        .context("Failed to initialize coordinate file")?;

    println!(
        "Checkers vision starting in {} mode{}",
        mode,
        if demo { " (demo)" } else { "" }
    );
    println!("Publishing to {}", publisher.path().display());
    println!("Press Ctrl+C to stop.");

    let mut frames = 0u64;
    while let Some(frame) = source.next_frame().context("Failed to read frame")? {
        let start = Instant::now();

        // Step 3: Undistort, rectify, crop
        let normalized = preparer
            .prepare(&frame)
            .context("Failed to prepare frame")?;

        // Step 4: Black and white masks
        let masks = segmenter.segment(&normalized);

        // Step 5: Locate pieces, annotating the same frame for both colors
        let (annotated, black) = locator.locate(&masks.black, &normalized, PieceColor::Black);
        let (annotated, white) = locator.locate(&masks.white, &annotated, PieceColor::White);

        // Step 6: Debug views
        if let Some(out) = &debug_out {
            out.save("input", frame)
                .and_then(|_| out.save("normalized", normalized))
                .and_then(|_| out.save("mask_black", masks.black))
                .and_then(|_| out.save("mask_white", masks.white))
                .and_then(|_| out.save("result", annotated))
                .context("Failed to write debug images")?;
        }

        // Step 7: Publish
        publisher
            .publish(&black, &white)
            .context("Failed to publish coordinates")?;

        frames += 1;
        debug!(
            "Frame {}: {} black, {} white in {:?}",
            frames,
            black.found_count(),
            white.found_count(),
            start.elapsed()
        );
        if max_frames.is_some_and(|max| frames >= max) {
            info!("Reached --max-frames {}", frames);
            break;
        }
    }

    info!("Processed {} frames", frames);
    Ok(())
}
