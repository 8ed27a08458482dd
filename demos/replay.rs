use std::path::PathBuf;

use anyhow::Error;
use clap::Parser;
use speedtrack::{logger, BBox, Config, Detection, Frame, Pipeline, ReplayDetector};

const FPS: f64 = 25.0;
const STEP: usize = 3;

fn square_frame(x: usize, y: usize, ts: f64) -> Frame {
    let mut frame = Frame::filled(640, 480, 16, ts);
    for r in 0..48 {
        for c in 0..48 {
            frame.image[(y + r, x + c)] = (96 + (c * 3 + r * 2) % 128) as u8;
        }
    }
    frame
}

#[derive(Debug, Parser)]
#[command(version, about = "Replays a synthetic moving square through the pipeline")]
struct Opts {
    /// YAML config; a flat 40 px/m road is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 30)]
    frames: usize,
}

fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    let config = match &opts.config {
        Some(path) => Config::load_from(path)?,
        None => {
            let mut config = Config::default();
            // 40 px per meter on a flat road
            config.calibration.homography_src_points =
                vec![[0.0, 0.0], [640.0, 0.0], [640.0, 480.0], [0.0, 480.0]];
            config.calibration.homography_dst_points =
                vec![[0.0, 0.0], [16.0, 0.0], [16.0, 12.0], [0.0, 12.0]];
            config
        }
    };

    logger::init(&config.logging)?;

    let seed = Detection::new(BBox::ltwh(44.0, 196.0, 56.0, 56.0), 0.9, 2);
    let detector = ReplayDetector::new(vec![vec![seed]]);
    let mut pipeline = Pipeline::from_config(&config, detector)?;

    for k in 0..opts.frames {
        let x = (48 + STEP * k).min(640 - 48);
        let frame = square_frame(x, 200, k as f64 / FPS);

        for report in pipeline.process(&frame)? {
            println!(
                "frame {:>2}  track {}  box {:?}  speed {:6.2}",
                k,
                report.track_id,
                report.bbox.as_slice(),
                report.speed
            );
        }
    }

    Ok(())
}
