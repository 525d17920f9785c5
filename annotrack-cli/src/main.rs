// Annotrack Command Line Interface
// Mask propagation over extracted frames and annotation store maintenance

use annotrack_core::LabelMap;
use annotrack_storage::{AnnotationStore, AnnotationWriter, LabelFile, SaveOutcome, SaveRequest};
use annotrack_tracker::models::ReplayEngine;
use annotrack_tracker::{
    ImageSequenceSource, PngSequenceSink, PropagationController, RunReport, RunRequest, StopSignal, TrackingConfig,
    TrackingError, VideoSink,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "annotrack")]
#[command(about = "Annotrack - propagate instance masks through video and manage per-frame annotations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate a seeded mask through a directory of frames
    Propagate {
        /// Directory of extracted frame images
        #[arg(long)]
        frames: PathBuf,

        /// Directory of precomputed per-frame id masks
        #[arg(long)]
        masks: PathBuf,

        /// Id mask of the start frame
        #[arg(long)]
        initial_mask: PathBuf,

        /// Instance names as name=id
        #[arg(long, value_parser = parse_label, num_args = 1..)]
        labels: Vec<(String, u16)>,

        /// Start frame
        #[arg(long, default_value = "0")]
        start: u64,

        /// Tracking configuration (.toml or .yaml)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Record overlay frames
        #[arg(long)]
        record: bool,

        /// Annotation folder
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Frame rate of the source video
        #[arg(long)]
        fps: Option<f64>,
    },

    /// Print the stored annotation of a label path
    Show {
        /// Frame label path or standalone label file
        path: PathBuf,
    },

    /// Merge the shapes of a label document into a target
    Merge {
        /// Label document to read shapes from
        source: PathBuf,

        /// Frame label path or standalone label file to update
        target: PathBuf,
    },

    /// Rewrite a folder's annotation log with one record per frame
    Compact {
        /// Annotation folder
        folder: PathBuf,
    },
}

fn parse_label(s: &str) -> Result<(String, u16), String> {
    let (name, id) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=id, got '{}'", s))?;
    let id = id.trim().parse().map_err(|e| format!("invalid id in '{}': {}", s, e))?;
    Ok((name.trim().to_string(), id))
}

fn default_output(frames: &Path) -> PathBuf {
    let name = frames
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frames".to_string());
    frames.with_file_name(format!("{}_labels", name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "annotrack=debug" } else { "annotrack=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Propagate {
            frames,
            masks,
            initial_mask,
            labels,
            start,
            config,
            record,
            output,
            fps,
        } => {
            let mut config = match config {
                Some(path) => TrackingConfig::from_file(&path)?,
                None => TrackingConfig::default(),
            };
            config.recording |= record;

            let seed = image::open(&initial_mask)
                .with_context(|| format!("cannot read initial mask {:?}", initial_mask))?
                .to_luma8();
            let initial = LabelMap::from_gray(&seed);

            let mut source = ImageSequenceSource::open(&frames)?;
            if let Some(fps) = fps {
                source = source.with_fps(fps);
            }
            let engine = ReplayEngine::open(&masks)?;

            let signal = StopSignal::new();
            let mut controller = PropagationController::new(config, Box::new(engine))?.with_stop_signal(signal.clone());
            let recording = controller.config().recording;

            let output = output.unwrap_or_else(|| default_output(&frames));
            let record_dir = output.join("recording");
            let request = RunRequest::new(&frames, start, initial)
                .with_labels(labels.into_iter().collect::<BTreeMap<_, _>>())
                .with_output_folder(&output);

            let ctrl_c = signal.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Stopping after the current frame");
                    ctrl_c.stop();
                }
            });

            let result = tokio::task::spawn_blocking(move || -> Result<RunReport, TrackingError> {
                let mut sink = if recording {
                    Some(PngSequenceSink::create(record_dir)?)
                } else {
                    None
                };
                controller.run(&mut source, sink.as_mut().map(|s| s as &mut dyn VideoSink), request)
            })
            .await?;
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    if let Some(resume) = e.resume_point() {
                        println!("{}", resume);
                    }
                    return Err(e.into());
                }
            };

            info!(
                "Processed {} frames, reseeded at {:?}",
                report.frames_processed, report.reseeded_frames
            );
            if let Some(path) = &report.summary_path {
                info!("Tracking summary: {:?}", path);
            }
            println!("{}", report.stop);
        }

        Commands::Show { path } => {
            let writer = AnnotationWriter::new(&path);
            match writer.load()? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("No annotation stored for {:?}", path),
            }
        }

        Commands::Merge { source, target } => {
            let document = LabelFile::load(&source).with_context(|| format!("cannot read label document {:?}", source))?;
            let mut request = SaveRequest::new(
                document.shapes,
                document.image_height.unwrap_or(0),
                document.image_width.unwrap_or(0),
            );
            if let Some(image_path) = document.image_path {
                request = request.with_image_path(image_path);
            }
            if let Some(caption) = document.caption {
                request = request.with_caption(caption);
            }
            match AnnotationWriter::new(&target).save(&request)? {
                SaveOutcome::Written => println!("Merged {:?} into {:?}", source, target),
                SaveOutcome::SkippedManualEdit => println!("{:?} was edited manually, left unchanged", target),
            }
        }

        Commands::Compact { folder } => {
            let mut store = AnnotationStore::open(&folder)?;
            store.compact()?;
            println!("Compacted {:?}: {} frames", store.path(), store.len());
        }
    }

    Ok(())
}
