use crate::{
    channel::CommandReceiver,
    sink::ObservationSink,
    types::node_label,
    Command, Observation,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Length of one generation cycle.
pub const TICK: Duration = Duration::from_secs(1);

/// Requests a generator emits between two yields to the runtime.
pub const YIELD_EVERY: u32 = 4096;

/// Status emitted for every request while a node is forced into errors.
pub const FORCED_ERROR_CODE: u16 = 500;

/// Codes a healthy node occasionally answers with.
pub const BAD_CODES: [u16; 7] = [400, 401, 403, 404, 500, 501, 503];

/// One request in `BAD_CODE_ODDS` draws a code from [`BAD_CODES`].
const BAD_CODE_ODDS: u32 = 10_000;
const BAD_CODE_SENTINEL: u32 = 5;

const LATENCY_FAST_MS: f64 = 200.0;
const LATENCY_SLOW_MS: f64 = 75.0;

/// Live state of one node, shared by its generator and its listener only.
#[derive(Debug)]
pub struct GeneratorState {
    rps: AtomicU32,
    producing_errors: AtomicBool,
    paused: AtomicBool,
    forced_error_code: AtomicU16,
}

/// Point-in-time copy of a [`GeneratorState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Target requests per second.
    pub rps: u32,

    /// Every request is forced to `forced_error_code`.
    pub producing_errors: bool,

    /// No requests are emitted.
    pub paused: bool,

    /// Status used while `producing_errors` is set.
    pub forced_error_code: u16,
}

impl GeneratorState {
    /// Creates a serving state at `rps`: not paused, no forced errors.
    pub fn new(rps: u32) -> Self {
        Self {
            rps: AtomicU32::new(rps),
            producing_errors: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            forced_error_code: AtomicU16::new(FORCED_ERROR_CODE),
        }
    }

    /// Overwrites every field from `command`. No field survives from before.
    pub fn apply(&self, command: &Command) {
        if command.produce_errors {
            self.forced_error_code
                .store(FORCED_ERROR_CODE, Ordering::Relaxed);
        }
        self.producing_errors
            .store(command.produce_errors, Ordering::Relaxed);
        self.paused.store(command.paused, Ordering::Relaxed);
        self.rps.store(command.target_rps, Ordering::Relaxed);
    }

    /// Current target rate.
    pub fn rps(&self) -> u32 {
        self.rps.load(Ordering::Relaxed)
    }

    /// Whether generation is suspended.
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Whether every request is forced to fail.
    pub fn producing_errors(&self) -> bool {
        self.producing_errors.load(Ordering::Relaxed)
    }

    /// Copies the current state. Fields are read one by one, not atomically as a set.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            rps: self.rps(),
            producing_errors: self.producing_errors(),
            paused: self.paused(),
            forced_error_code: self.forced_error_code.load(Ordering::Relaxed),
        }
    }
}

/// Request budget for one tick: `rps` plus a jitter draw from `[0, jitter)`.
pub fn draw_budget<R: Rng>(rng: &mut R, rps: u32, jitter: u32) -> u32 {
    rps.saturating_add(rng.gen_range(0..jitter.max(1)))
}

/// Status of a healthy request: 200, or a uniformly chosen bad code one time in ten thousand.
pub fn draw_status<R: Rng>(rng: &mut R) -> u16 {
    if rng.gen_range(0..BAD_CODE_ODDS) == BAD_CODE_SENTINEL {
        BAD_CODES[rng.gen_range(0..BAD_CODES.len())]
    } else {
        200
    }
}

/// Latency as the sum of two uniforms over `[0, 200)` and `[0, 75)` ms.
pub fn draw_latency<R: Rng>(rng: &mut R) -> f64 {
    rng.gen::<f64>() * LATENCY_FAST_MS + rng.gen::<f64>() * LATENCY_SLOW_MS
}

/// Synthesizes one request against `state`.
pub fn synthesize<R: Rng>(rng: &mut R, node: &str, state: &GeneratorState) -> Observation {
    let (status, is_error) = if state.producing_errors() {
        (state.forced_error_code.load(Ordering::Relaxed), true)
    } else {
        let status = draw_status(rng);
        (status, status >= 500)
    };
    Observation {
        node: node.to_string(),
        status,
        is_error,
        latency_ms: draw_latency(rng),
    }
}

/// The request generator of one simulated node.
pub struct Node<S: ObservationSink> {
    /// 1-based node id.
    id: usize,

    label: String,

    state: Arc<GeneratorState>,

    sink: Arc<S>,

    jitter: u32,
}

impl<S: ObservationSink> Node<S> {
    /// Creates a node serving at its initial rate.
    ///
    /// # Arguments
    /// * `id` - 1-based node id.
    /// * `rps` - Initial target rate.
    /// * `jitter` - Exclusive bound of the per-tick jitter draw.
    /// * `sink` - Destination for the node's observations.
    pub fn new(id: usize, rps: u32, jitter: u32, sink: Arc<S>) -> Self {
        Self {
            id,
            label: node_label(id),
            state: Arc::new(GeneratorState::new(rps)),
            sink,
            jitter,
        }
    }

    /// 1-based node id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// State handle shared with the node's listener.
    pub fn state(&self) -> Arc<GeneratorState> {
        Arc::clone(&self.state)
    }

    /// Runs one tick's emission and returns how many observations were recorded.
    ///
    /// Pause and error injection are re-read per request, so a command landing
    /// mid-tick takes effect for the rest of the tick.
    pub fn tick<R: Rng>(&self, rng: &mut R) -> u32 {
        let budget = draw_budget(rng, self.state.rps(), self.jitter);
        self.emit(rng, budget)
    }

    /// Emits up to `count` observations, stopping early if the node is paused.
    fn emit<R: Rng>(&self, rng: &mut R, count: u32) -> u32 {
        let mut emitted = 0;
        for _ in 0..count {
            if self.state.paused() {
                break;
            }
            self.sink
                .record(synthesize(rng, &self.label, &self.state));
            emitted += 1;
        }
        emitted
    }

    /// Generates forever, one tick per second.
    ///
    /// The budget is emitted in batches of [`YIELD_EVERY`] with a yield between
    /// batches, so listeners and timers on the same runtime keep running however
    /// large the rate.
    pub async fn run(self, mut rng: StdRng) {
        loop {
            let deadline = Instant::now() + TICK;
            let mut remaining = draw_budget(&mut rng, self.state.rps(), self.jitter);
            while remaining > 0 {
                let batch = remaining.min(YIELD_EVERY);
                if self.emit(&mut rng, batch) < batch {
                    break;
                }
                remaining -= batch;
                tokio::task::yield_now().await;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Applies commands from `commands` to `state` until every sender is gone.
pub async fn listen(id: usize, state: Arc<GeneratorState>, mut commands: CommandReceiver) {
    while let Some(command) = commands.recv().await {
        state.apply(&command);
        tracing::debug!(
            node = id,
            rps = command.target_rps,
            paused = command.paused,
            produce_errors = command.produce_errors,
            "applied command"
        );
    }
    tracing::debug!(node = id, "command channel closed");
}

/// Spawns the generator and listener tasks for `node`.
pub fn spawn<S: ObservationSink>(node: Node<S>, commands: CommandReceiver) -> [JoinHandle<()>; 2] {
    let id = node.id();
    let listener = tokio::spawn(listen(id, node.state(), commands));
    let generator = tokio::spawn(node.run(StdRng::from_entropy()));
    [generator, listener]
}
