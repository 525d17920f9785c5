//! Frame propagation controller
//!
//! Walks the video from a seeded frame, alternating between reseeding the
//! engine from full masks and incremental stepping. Every frame is checked
//! for lost instances, repaired from cached boxes where possible and written
//! to the annotation store. The summary table and the video sink are
//! finalized on every exit path.

use crate::config::TrackingConfig;
use crate::error::{Result, TrackingError};
use crate::frames::{Frame, FrameSource};
use crate::models::{FlowField, OpticalFlowProvider, RecoverySegmenter, SegmentationEngine};
use crate::processing::{
    recover_instances, summary_path_for, BboxCache, BoxAdmission, PresenceTracker, PresenceVerdict, SummaryWriter,
    TrackingState,
};
use crate::sink::VideoSink;
use crate::stop::{StopMessage, StopReason, StopSignal};
use crate::visualize::{render_frame, save_debug_masks};
use annotrack_core::{FrameIndex, LabelMap, Mask, Shape};
use annotrack_storage::{frame_label_path, video_folder, AnnotationStore, AnnotationWriter, SaveOutcome, SaveRequest};
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, RgbImage};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Label of the background entry in a label map
pub const BACKGROUND_LABEL: &str = "_background_";

/// Inputs of one propagation run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Video (or frame directory) the run belongs to
    pub video_path: PathBuf,
    /// Annotation folder, the video path without extension when unset
    pub output_folder: Option<PathBuf>,
    pub start_frame: FrameIndex,
    /// Full id mask of the start frame
    pub initial_mask: LabelMap,
    /// Instance name to id
    pub labels: BTreeMap<String, u16>,
    /// Treat the video as occluded from the start
    pub assume_occlusion: bool,
}

impl RunRequest {
    pub fn new(video_path: impl Into<PathBuf>, start_frame: FrameIndex, initial_mask: LabelMap) -> Self {
        Self {
            video_path: video_path.into(),
            output_folder: None,
            start_frame,
            initial_mask,
            labels: BTreeMap::new(),
            assume_occlusion: false,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, u16>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(folder.into());
        self
    }

    pub fn with_occlusion(mut self, assume_occlusion: bool) -> Self {
        self.assume_occlusion = assume_occlusion;
        self
    }
}

/// Result of a run that ended without a resource or engine error
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stop: StopMessage,
    pub reason: StopReason,
    pub frames_processed: u64,
    pub reseeded_frames: Vec<FrameIndex>,
    pub final_state: TrackingState,
    pub summary_path: Option<PathBuf>,
}

/// Instance names by id and back
#[derive(Debug, Clone, Default)]
struct InstanceNames {
    by_id: BTreeMap<u16, String>,
    by_name: HashMap<String, u16>,
}

impl InstanceNames {
    fn new(labels: &BTreeMap<String, u16>) -> Self {
        let mut names = Self::default();
        for (name, id) in labels {
            if name == BACKGROUND_LABEL || *id == 0 {
                continue;
            }
            names.by_id.insert(*id, name.clone());
            names.by_name.insert(name.clone(), *id);
        }
        names
    }

    fn name(&self, id: u16) -> String {
        self.by_id.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn id(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied().or_else(|| name.parse().ok())
    }
}

/// State owned by a single run
struct RunContext<'s> {
    folder: PathBuf,
    store: AnnotationStore,
    summary: SummaryWriter,
    cache: BboxCache,
    state: TrackingState,
    /// Labels of the initial mask; engine output outside this set is dropped
    known: BTreeSet<String>,
    seed: LabelMap,
    names: InstanceNames,
    sink: Option<&'s mut dyn VideoSink>,
    reseeded: Vec<FrameIndex>,
    frames_processed: u64,
    last_processed: Option<FrameIndex>,
}

pub struct PropagationController {
    config: TrackingConfig,
    engine: Box<dyn SegmentationEngine>,
    recovery: Option<Box<dyn RecoverySegmenter>>,
    flow: Option<Box<dyn OpticalFlowProvider>>,
    stop_signal: StopSignal,
    presence: PresenceTracker,
}

impl PropagationController {
    pub fn new(config: TrackingConfig, engine: Box<dyn SegmentationEngine>) -> Result<Self> {
        config.validate().map_err(TrackingError::Config)?;
        Ok(Self {
            presence: PresenceTracker::new(config.presence.clone()),
            config,
            engine,
            recovery: None,
            flow: None,
            stop_signal: StopSignal::new(),
        })
    }

    pub fn with_recovery(mut self, segmenter: Box<dyn RecoverySegmenter>) -> Self {
        self.recovery = Some(segmenter);
        self
    }

    pub fn with_flow(mut self, provider: Box<dyn OpticalFlowProvider>) -> Self {
        self.flow = Some(provider);
        self
    }

    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Propagate from `request.start_frame` until the horizon, the end of
    /// the video, a fatal loss of instances or cancellation.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut dyn VideoSink>,
        request: RunRequest,
    ) -> Result<RunReport> {
        let frame_count = source.frame_count();
        let names = InstanceNames::new(&request.labels);
        let instance_labels: BTreeSet<String> = request
            .initial_mask
            .instance_ids()
            .into_iter()
            .map(|id| names.name(id))
            .collect();
        let mut state = TrackingState::new(instance_labels.clone(), request.start_frame);
        state.has_occlusion = request.assume_occlusion;

        if frame_count > 0 && request.start_frame == frame_count - 1 {
            info!("Frame {} is the last frame, nothing to propagate", request.start_frame);
            if let Some(sink) = sink.as_mut() {
                sink.finish()?;
            }
            return Ok(RunReport {
                stop: StopMessage::already_complete(request.start_frame),
                reason: StopReason::AlreadyComplete,
                frames_processed: 0,
                reseeded_frames: Vec::new(),
                final_state: state,
                summary_path: None,
            });
        }

        if state.instance_labels.is_empty() {
            return Err(TrackingError::Config("initial mask contains no instances".to_string()));
        }
        let (width, height) = source.dimensions();
        if (request.initial_mask.width(), request.initial_mask.height()) != (width, height) {
            return Err(TrackingError::Config(format!(
                "initial mask is {}x{}, video is {}x{}",
                request.initial_mask.width(),
                request.initial_mask.height(),
                width,
                height
            )));
        }

        let folder = request
            .output_folder
            .clone()
            .unwrap_or_else(|| video_folder(&request.video_path));
        std::fs::create_dir_all(&folder)
            .map_err(|e| TrackingError::Storage(format!("Cannot create annotation folder {:?}: {}", folder, e)))?;
        let store = AnnotationStore::open(&folder)?;

        let fps = source
            .fps()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.config.fallback_fps);
        if self.config.recording && sink.is_none() {
            warn!("Recording is enabled but no video sink was given");
        }

        info!(
            "Propagating {} instances from frame {} over {} frames",
            state.expected_instance_count, request.start_frame, self.config.frames_to_propagate
        );
        let mut ctx = RunContext {
            folder,
            store,
            summary: SummaryWriter::new(summary_path_for(&request.video_path), fps),
            cache: BboxCache::new(
                self.config.cache_capacity(),
                BoxAdmission {
                    min_ratio: self.config.min_box_area_ratio,
                    max_ratio: self.config.max_box_area_ratio,
                },
            ),
            state,
            known: instance_labels,
            seed: request.initial_mask,
            names,
            sink,
            reseeded: Vec::new(),
            frames_processed: 0,
            last_processed: None,
        };

        let outcome = self.propagate(source, request.start_frame, &mut ctx);

        let flushed = ctx.summary.flush();
        let finished = match ctx.sink.as_mut() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };
        let (stop, reason) = outcome.map_err(|e| {
            let resume = StopMessage::stopped_at(ctx.last_processed.unwrap_or(request.start_frame));
            warn!("Run aborted, resume from frame {}: {}", resume.frame, e);
            TrackingError::Interrupted {
                source: Box::new(e),
                resume,
            }
        })?;
        flushed?;
        finished?;

        info!("Run stopped ({:?}) after {} frames", reason, ctx.frames_processed);
        Ok(RunReport {
            stop,
            reason,
            frames_processed: ctx.frames_processed,
            reseeded_frames: ctx.reseeded,
            final_state: ctx.state,
            summary_path: Some(ctx.summary.path().to_path_buf()),
        })
    }

    fn propagate(
        &mut self,
        source: &mut dyn FrameSource,
        start: FrameIndex,
        ctx: &mut RunContext<'_>,
    ) -> Result<(StopMessage, StopReason)> {
        let end = start.saturating_add(self.config.frames_to_propagate);
        let mut current = start;
        let mut prev_frame: Option<Frame> = None;

        loop {
            if self.stop_signal.is_stopped() {
                info!("Cancelled before frame {}", current);
                return Ok((
                    StopMessage::stopped_at(ctx.last_processed.unwrap_or(start)),
                    StopReason::Cancelled,
                ));
            }
            if current > end {
                return Ok((
                    StopMessage::stopped_at(ctx.last_processed.unwrap_or(start)),
                    StopReason::EndOfRange,
                ));
            }
            let frame = match source.read(current) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Ok((
                        StopMessage::stopped_at(ctx.last_processed.unwrap_or(start)),
                        StopReason::EndOfVideo,
                    ))
                }
                Err(e) => {
                    warn!("Skipping unreadable frame {}: {}", current, e);
                    prev_frame = None;
                    current += 1;
                    continue;
                }
            };
            ctx.state.current_frame = current;

            let reseed = current == start
                || (self.config.mem_every > 1 && current % self.config.mem_every == 0)
                || ctx.state.need_full_reseed;
            let prediction = if reseed {
                let num_objects = ctx.seed.instance_ids().last().copied().unwrap_or(0);
                let masks = ctx.seed.one_hot(num_objects);
                debug!("Reseeding engine at frame {} with {} planes", current, masks.len());
                ctx.state.need_full_reseed = false;
                ctx.reseeded.push(current);
                self.engine.reseed(&frame, &masks)?
            } else {
                self.engine.step(&frame)?
            };
            if (prediction.width(), prediction.height()) != (frame.width(), frame.height()) {
                return Err(TrackingError::Engine(format!(
                    "prediction is {}x{} for a {}x{} frame",
                    prediction.width(),
                    prediction.height(),
                    frame.width(),
                    frame.height()
                )));
            }
            let predicted = prediction.to_label_map();

            let flow = match (self.flow.as_mut(), prev_frame.as_ref()) {
                (Some(provider), Some(prev)) => match provider.compute(prev, &frame) {
                    Ok(flow) => Some(flow),
                    Err(e) => {
                        warn!("Optical flow failed at frame {}: {}", current, e);
                        None
                    }
                },
                _ => None,
            };

            let mut mask_dict: Vec<(String, Mask)> = Vec::new();
            for id in predicted.instance_ids() {
                let name = ctx.names.name(id);
                if ctx.known.contains(&name) {
                    mask_dict.push((name, predicted.mask_for(id)));
                } else {
                    debug!("Ignoring unknown instance {} at frame {}", name, current);
                }
            }
            let observed: BTreeSet<String> = mask_dict.iter().map(|(name, _)| name.clone()).collect();

            let mut recovered_labels = BTreeSet::new();
            let missing = self.presence.missing(&ctx.state, &observed);
            if !missing.is_empty() {
                let message = StopMessage::missing_instances(current, missing.len(), &missing);
                info!("{}", message.text);

                let recovered = match self.recovery.as_mut() {
                    Some(segmenter) => recover_instances(
                        segmenter.as_mut(),
                        &ctx.cache,
                        &frame,
                        &missing,
                        self.config.recovery_score_threshold,
                    ),
                    None => Vec::new(),
                };
                let recovered_names: Vec<String> = recovered.iter().map(|(name, _)| name.clone()).collect();
                let verdict = self.presence.classify(&mut ctx.state, &observed, &recovered_names);
                if !recovered.is_empty() {
                    info!("Recovered {:?} at frame {}", recovered_names, current);
                }
                recovered_labels.extend(recovered_names);
                mask_dict.extend(recovered);

                if let PresenceVerdict::Fatal { missing } = verdict {
                    if !recovered_labels.is_empty() {
                        self.persist_frame(ctx, &frame, &mask_dict, &recovered_labels, flow.as_ref())?;
                    }
                    return Ok((message, StopReason::Fatal { missing }));
                }
            }

            self.persist_frame(ctx, &frame, &mask_dict, &recovered_labels, flow.as_ref())?;

            ctx.seed = LabelMap::from_masks(
                frame.width(),
                frame.height(),
                mask_dict
                    .iter()
                    .filter_map(|(name, mask)| ctx.names.id(name).map(|id| (id, mask))),
            );

            if self.config.recording {
                if let Some(sink) = ctx.sink.as_mut() {
                    let visualization = render_frame(&frame.image, &ctx.seed, flow.as_ref());
                    if let Err(e) = sink.write(current, &visualization) {
                        warn!("Cannot record frame {}: {}", current, e);
                    }
                }
            }
            let debug_due = self.config.debug_every.map_or(false, |n| current % n == 0);
            if reseed || debug_due {
                let label_path = frame_label_path(&ctx.folder, current);
                if let Err(e) = save_debug_masks(&label_path, &frame.image, &predicted) {
                    warn!("Cannot save debug masks for frame {}: {}", current, e);
                }
            }

            ctx.frames_processed += 1;
            ctx.last_processed = Some(current);
            prev_frame = Some(frame);
            current += 1;
        }
    }

    /// Summary rows, polygon shapes, cache update and store write for a frame.
    fn persist_frame(
        &self,
        ctx: &mut RunContext<'_>,
        frame: &Frame,
        mask_dict: &[(String, Mask)],
        recovered: &BTreeSet<String>,
        flow: Option<&FlowField>,
    ) -> Result<()> {
        let mut shapes = Vec::with_capacity(mask_dict.len());
        for (name, mask) in mask_dict {
            ctx.summary.record(frame.index, name, mask, flow);
            let Some(shape) = Shape::polygon_from_mask(name.as_str(), mask, self.config.polygon_epsilon) else {
                continue;
            };
            let description = if recovered.contains(name) { "recovered" } else { "propagated" };
            let mut shape = shape.with_description(description);
            if self.config.persist_masks {
                shape = shape.with_mask(mask.clone());
            }
            ctx.cache.add_polygon(name, &shape.points, frame.area());
            shapes.push(shape);
        }

        let mut request = SaveRequest::new(shapes, frame.height(), frame.width());
        if self.config.embed_image {
            request = request.with_image_data(encode_png(&frame.image)?);
        }
        let writer = AnnotationWriter::new(frame_label_path(&ctx.folder, frame.index));
        match writer.save_with(&mut ctx.store, &request)? {
            SaveOutcome::Written => debug!("Saved {} shapes for frame {}", request.shapes.len(), frame.index),
            SaveOutcome::SkippedManualEdit => info!("Frame {} was edited manually, keeping it", frame.index),
        }
        Ok(())
    }
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(bytes)
}
