use std::sync::{mpsc::SyncSender, Arc, Mutex, MutexGuard};

use crate::{
    device, AppConfig, AudioFrame, Color, InputHandle, OutputHandle, OutputRing, RenderMode,
    Result, VisualiserError,
};

/// Runtime selection shared between the user interface and the capture
/// worker.
///
/// Device fields hold the resolved name of the open endpoint, or `None`
/// before the first selection.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualiserState {
    pub mode: RenderMode,
    pub color: Color,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// High level controller owning the audio device handles.
///
/// Stream handles are not `Send`, so the controller lives on the interface
/// thread; the capture worker observes selections through a [`StateHandle`]
/// snapshot once per frame. Mode and colour updates therefore take effect on
/// the next captured frame.
pub struct Visualiser {
    config: AppConfig,
    state: Arc<Mutex<VisualiserState>>,
    frames: SyncSender<AudioFrame>,
    playback: OutputRing,
    input: Option<InputHandle>,
    output: Option<OutputHandle>,
}

impl Visualiser {
    /// Creates a controller with no devices open yet. `frames` is the sender
    /// every capture stream will deliver into; `playback` feeds the output
    /// stream callback.
    pub fn new(config: AppConfig, frames: SyncSender<AudioFrame>, playback: OutputRing) -> Self {
        let state = VisualiserState {
            mode: config.visual.mode,
            color: config.visual.bar_color,
            input_device: None,
            output_device: None,
        };

        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            frames,
            playback,
            input: None,
            output: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns a cloneable read view for the capture worker.
    pub fn state_handle(&self) -> StateHandle {
        StateHandle::new(self.state.clone())
    }

    pub fn snapshot(&self) -> Result<VisualiserState> {
        Ok(self.lock_state()?.clone())
    }

    /// Switches the layout used for subsequently captured frames.
    pub fn select_mode(&self, mode: RenderMode) -> Result<()> {
        let mut state = self.lock_state()?;
        state.mode = mode;
        tracing::debug!(mode = %mode, "render mode selected");
        Ok(())
    }

    /// Switches the fill colour used for subsequently captured frames.
    pub fn select_color(&self, color: Color) -> Result<()> {
        let mut state = self.lock_state()?;
        state.color = color;
        tracing::debug!(color = %color, "bar colour selected");
        Ok(())
    }

    /// Opens the requested capture device and retires the previous one.
    ///
    /// The replacement stream is opened first; if that fails the previous
    /// device keeps running and the state is untouched.
    pub fn select_input_device(&mut self, selector: Option<&str>) -> Result<()> {
        let handle = device::open_input(selector, &self.config.audio, self.frames.clone())?;
        let name = handle.device_name().to_string();
        self.input = Some(handle);

        let mut state = self.lock_state()?;
        state.input_device = Some(name);
        Ok(())
    }

    /// Opens the requested playback device and retires the previous one.
    ///
    /// Same transactional behaviour as [`Visualiser::select_input_device`].
    pub fn select_output_device(&mut self, selector: Option<&str>) -> Result<()> {
        let handle = device::open_output(selector, &self.config.audio, self.playback.clone())?;
        let name = handle.device_name().to_string();
        self.output = Some(handle);

        let mut state = self.lock_state()?;
        state.output_device = Some(name);
        Ok(())
    }

    /// Closes both devices. Dropping the controller does the same.
    pub fn close_devices(&mut self) {
        self.input.take();
        self.output.take();
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, VisualiserState>> {
        self.state
            .lock()
            .map_err(|_| VisualiserError::msg("visualiser state has been poisoned"))
    }
}

/// Shared, thread-safe read view over the state managed by [`Visualiser`].
#[derive(Clone)]
pub struct StateHandle {
    shared: Arc<Mutex<VisualiserState>>,
}

impl StateHandle {
    pub(crate) fn new(shared: Arc<Mutex<VisualiserState>>) -> Self {
        Self { shared }
    }

    /// Returns a copy of the current selection.
    pub fn snapshot(&self) -> Result<VisualiserState> {
        let state = self.lock()?;
        Ok(state.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, VisualiserState>> {
        self.shared
            .lock()
            .map_err(|_| VisualiserError::msg("visualiser state has been poisoned"))
    }
}

impl std::fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle").finish()
    }
}
