//! The capture worker and its channel plumbing.
//!
//! One worker thread sits between the input stream, the playback ring and
//! the render side. Per frame it writes the samples through to playback
//! first, then snapshots the current selection and hands a packet to the
//! renderer. Rendering is fire-and-forget: a busy render side costs a
//! skipped visual frame, never audio.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::{
    render, AudioFrame, Color, OutputRing, RenderMode, Result, StateHandle, Surface,
    VisualiserError,
};

/// Captured frames the worker has not consumed yet. Small on purpose: if the
/// worker stalls this long, older audio is not worth keeping.
pub const FRAME_QUEUE_DEPTH: usize = 4;
/// At most one packet waits for the render side; anything beyond is shed.
pub const RENDER_QUEUE_DEPTH: usize = 1;

const STOP_POLL: Duration = Duration::from_millis(250);

/// Channel carrying whole captured frames from the device callback to the
/// worker.
pub fn frame_channel() -> (SyncSender<AudioFrame>, Receiver<AudioFrame>) {
    mpsc::sync_channel(FRAME_QUEUE_DEPTH)
}

/// Channel carrying render packets from the worker to the presentation side.
pub fn render_channel() -> (SyncSender<RenderPacket>, Receiver<RenderPacket>) {
    mpsc::sync_channel(RENDER_QUEUE_DEPTH)
}

/// One frame together with the selection that was current when it was
/// dispatched. A packet renders with these values even if the selection
/// changes before the renderer gets to it.
#[derive(Debug, Clone)]
pub struct RenderPacket {
    pub frame: AudioFrame,
    pub mode: RenderMode,
    pub color: Color,
}

/// Renders one packet onto a surface, using the size the surface reports at
/// this moment.
pub fn render_packet(packet: &RenderPacket, surface: &mut dyn Surface) -> Result<()> {
    let primitives = packet.mode.render(&packet.frame, surface.size(), packet.color)?;
    render::submit(surface, &primitives)
}

/// The blocking capture loop.
pub struct CaptureWorker {
    frames: Receiver<AudioFrame>,
    playback: OutputRing,
    state: StateHandle,
    renders: SyncSender<RenderPacket>,
    stop: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(
        frames: Receiver<AudioFrame>,
        playback: OutputRing,
        state: StateHandle,
        renders: SyncSender<RenderPacket>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frames,
            playback,
            state,
            renders,
            stop,
        }
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(self) -> Result<thread::JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("capture-worker".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Runs until the stop flag is raised or an endpoint disconnects.
    ///
    /// The receive timeout only exists to poll the stop flag; frames arrive
    /// much faster than it while a device is open.
    pub fn run(self) -> Result<()> {
        tracing::info!("capture worker running");

        while !self.stop.load(Ordering::Relaxed) {
            let frame = match self.frames.recv_timeout(STOP_POLL) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("capture side disconnected, stopping worker");
                    return Err(VisualiserError::msg("capture side disconnected"));
                }
            };

            // Playback comes first so a slow renderer can never delay audio.
            self.playback.write(frame.samples());

            let state = self.state.snapshot()?;
            let packet = RenderPacket {
                frame,
                mode: state.mode,
                color: state.color,
            };
            match self.renders.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("render side busy, frame not rendered");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::warn!("render side disconnected, stopping worker");
                    return Err(VisualiserError::msg("render side disconnected"));
                }
            }
        }

        tracing::info!("capture worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppConfig, CanvasSize, Visualiser};
    use std::time::Instant;

    struct TestPipeline {
        frames: SyncSender<AudioFrame>,
        renders: Receiver<RenderPacket>,
        visualiser: Visualiser,
        playback: OutputRing,
        stop: Arc<AtomicBool>,
        worker: thread::JoinHandle<Result<()>>,
    }

    fn start_pipeline() -> TestPipeline {
        let (frame_tx, frame_rx) = frame_channel();
        let (render_tx, render_rx) = render_channel();
        let playback = OutputRing::new(4096);
        let visualiser = Visualiser::new(AppConfig::default(), frame_tx.clone(), playback.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker::new(
            frame_rx,
            playback.clone(),
            visualiser.state_handle(),
            render_tx,
            stop.clone(),
        )
        .spawn()
        .unwrap();

        TestPipeline {
            frames: frame_tx,
            renders: render_rx,
            visualiser,
            playback,
            stop,
            worker,
        }
    }

    fn frame(value: i16) -> AudioFrame {
        AudioFrame::new(vec![value; 64], 44_100)
    }

    fn wait_for(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn plays_through_then_dispatches_a_packet() {
        let pipeline = start_pipeline();

        pipeline.frames.send(frame(5)).unwrap();
        let packet = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(packet.frame.samples()[0], 5);
        assert_eq!(packet.frame.len(), 64);
        assert_eq!(packet.mode, RenderMode::AverageHorizontal);
        assert_eq!(packet.color, Color::WHITE);
        // Pass-through happened before the packet went out.
        assert_eq!(pipeline.playback.len(), 64);

        pipeline.stop.store(true, Ordering::Relaxed);
        pipeline.worker.join().unwrap().unwrap();
    }

    #[test]
    fn selection_changes_ride_the_next_packet() {
        let pipeline = start_pipeline();

        pipeline.frames.send(frame(1)).unwrap();
        let first = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(first.mode, RenderMode::AverageHorizontal);

        let red = Color::new(255, 0, 0);
        pipeline.visualiser.select_mode(RenderMode::Mfcc).unwrap();
        pipeline.visualiser.select_color(red).unwrap();

        pipeline.frames.send(frame(2)).unwrap();
        let second = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(second.mode, RenderMode::Mfcc);
        assert_eq!(second.color, red);

        pipeline.stop.store(true, Ordering::Relaxed);
        pipeline.worker.join().unwrap().unwrap();
    }

    // Device reselection hands a fresh sender clone to the replacement
    // stream and drops the old stream's clone with its handle. The worker
    // keeps consuming across the swap without missing a beat.
    #[test]
    fn reselection_switches_the_producing_stream() {
        let pipeline = start_pipeline();

        let old_stream = pipeline.frames.clone();
        old_stream.send(frame(10)).unwrap();
        let first = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(first.frame.samples()[0], 10);

        drop(old_stream);
        let new_stream = pipeline.frames.clone();
        new_stream.send(frame(20)).unwrap();
        let second = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(second.frame.samples()[0], 20);

        pipeline.stop.store(true, Ordering::Relaxed);
        pipeline.worker.join().unwrap().unwrap();
    }

    #[test]
    fn busy_render_side_sheds_frames_without_blocking_audio() {
        let pipeline = start_pipeline();

        pipeline.frames.send(frame(1)).unwrap();
        pipeline.frames.send(frame(2)).unwrap();
        pipeline.frames.send(frame(3)).unwrap();

        // All three frames reach playback even though nothing drains the
        // render channel.
        wait_for(|| pipeline.playback.len() == 3 * 64);

        let first = pipeline
            .renders
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(first.frame.samples()[0], 1);

        // Frame 2 was dispatched while the slot was full, so it can never
        // arrive. Frame 3 may or may not have been shed depending on when we
        // drained; frame 4 proves the worker is still live either way.
        pipeline.frames.send(frame(4)).unwrap();
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match pipeline.renders.recv_timeout(Duration::from_millis(50)) {
                Ok(packet) => {
                    let value = packet.frame.samples()[0];
                    seen.push(value);
                    if value == 4 {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(err) => panic!("render channel failed: {err}"),
            }
        }
        assert!(seen.contains(&4));
        assert!(!seen.contains(&2));

        pipeline.stop.store(true, Ordering::Relaxed);
        pipeline.worker.join().unwrap().unwrap();
    }

    #[test]
    fn worker_reports_a_disconnected_capture_side() {
        let pipeline = start_pipeline();

        drop(pipeline.frames);
        drop(pipeline.visualiser);
        let result = pipeline.worker.join().unwrap();
        assert!(result.is_err());
    }

    #[derive(Default)]
    struct CountingSurface {
        rects: usize,
        polygons: usize,
        presented: usize,
    }

    impl Surface for CountingSurface {
        fn size(&self) -> CanvasSize {
            CanvasSize::new(800.0, 400.0)
        }

        fn clear(&mut self) {
            self.rects = 0;
            self.polygons = 0;
        }

        fn fill_rect(&mut self, _x1: f32, _y1: f32, _x2: f32, _y2: f32, _fill: Color) {
            self.rects += 1;
        }

        fn fill_polygon(&mut self, _points: &[[f32; 2]], _fill: Color) {
            self.polygons += 1;
        }

        fn present(&mut self) -> Result<()> {
            self.presented += 1;
            Ok(())
        }
    }

    #[test]
    fn packets_render_against_the_surface_size() {
        let packet = RenderPacket {
            frame: AudioFrame::new(vec![1000; 2048], 44_100),
            mode: RenderMode::AverageHorizontal,
            color: Color::WHITE,
        };

        let mut surface = CountingSurface::default();
        render_packet(&packet, &mut surface).unwrap();
        // 800 / 3 slots minus the edge margin.
        assert_eq!(surface.rects, 261);
        assert_eq!(surface.polygons, 0);
        assert_eq!(surface.presented, 1);
    }
}
