//! The per-thread debugger engine.
//!
//! Shared by every script thread. Each thread gets its own state record with
//! its own mutex and condvar; pausing is a condvar ping-pong between the
//! script thread (blocks in `checkpoint`) and the UI thread (flips the state
//! and notifies from `resume`). Pause notifications are pushed to a single
//! subscriber over a crossbeam channel, so the engine itself never blocks on
//! the UI.

use crate::rewriter::{CheckpointId, InstrumentationMaps};
use crate::vm::{DebugHost, LocalsPairs, LocalsProvider};
use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Monotonically increasing identifier of one pause instance.
pub type PauseId = u64;

/// Why a thread paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Hit a breakpoint (with its checkpoint id)
    Breakpoint(CheckpointId),
    /// Step completed
    Step,
}

/// Stepping mode — set on resume, checked at each checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    None,
    Into,
    Over,
    Out,
}

/// Resume command issued by the UI against a specific pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

/// Copied view of a frame, safe to hand across threads.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub method_name: String,
    pub checkpoint_id: Option<CheckpointId>,
    pub locals: LocalsPairs,
    /// Set when the locals provider failed; locals are empty in that case.
    pub diagnostic: Option<String>,
}

/// Notification delivered to the single pause subscriber.
#[derive(Debug, Clone)]
pub struct PauseEvent {
    pub pause_id: PauseId,
    pub thread_key: u64,
    pub reason: PauseReason,
    pub frame: FrameSnapshot,
    /// Frame-stack depth at the pause.
    pub depth: usize,
}

/// One active call frame.
struct FrameInfo {
    method_name: String,
    locals: LocalsPairs,
    last_checkpoint: Option<CheckpointId>,
}

/// Mutable per-thread debugger state, guarded by the thread's mutex.
struct ThreadInner {
    frames: Vec<FrameInfo>,
    step: StepMode,
    run_until: Option<CheckpointId>,
    pause_on_pop_to_depth: Option<usize>,
    pause_next: bool,
    current_pause: Option<PauseId>,
    last_paused: Option<FrameSnapshot>,
}

/// Per-thread record: created on the thread's first callback, kept for the
/// thread's lifetime.
struct ScriptThread {
    key: u64,
    inner: Mutex<ThreadInner>,
    resumed: Condvar,
}

/// The debugger engine shared across all script threads and the UI.
pub struct DebugEngine {
    breakpoints: RwLock<FxHashSet<CheckpointId>>,
    threads: DashMap<ThreadId, Arc<ScriptThread>>,
    maps: Arc<InstrumentationMaps>,
    next_pause_id: AtomicU64,
    next_thread_key: AtomicU64,
    events: Sender<PauseEvent>,
}

impl DebugEngine {
    /// Create an engine over a unit's instrumentation maps, returning the
    /// pause-event receiver for the single subscriber (the REPL).
    pub fn new(maps: Arc<InstrumentationMaps>) -> (Arc<Self>, Receiver<PauseEvent>) {
        let (events, receiver) = unbounded();
        let engine = Arc::new(Self {
            breakpoints: RwLock::new(FxHashSet::default()),
            threads: DashMap::new(),
            maps,
            next_pause_id: AtomicU64::new(1),
            next_thread_key: AtomicU64::new(1),
            events,
        });
        (engine, receiver)
    }

    pub fn maps(&self) -> &Arc<InstrumentationMaps> {
        &self.maps
    }

    // ── Breakpoint set ──────────────────────────────────────────────────

    /// Add a breakpoint. Idempotent.
    pub fn add_breakpoint(&self, id: CheckpointId) {
        self.breakpoints.write().insert(id);
    }

    /// Remove a breakpoint. Idempotent.
    pub fn remove_breakpoint(&self, id: CheckpointId) {
        self.breakpoints.write().remove(&id);
    }

    /// Current breakpoints in ascending id order.
    pub fn breakpoints(&self) -> Vec<CheckpointId> {
        let mut ids: Vec<_> = self.breakpoints.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ── Resume ──────────────────────────────────────────────────────────

    /// Resume the thread paused under `pause_id`. A stale or unknown id is
    /// a silent no-op (returns false).
    pub fn resume(&self, pause_id: PauseId, mode: ResumeMode) -> bool {
        for entry in self.threads.iter() {
            let thread = entry.value().clone();
            let mut inner = thread.inner.lock();
            if inner.current_pause != Some(pause_id) {
                continue;
            }
            self.apply_resume(&mut inner, mode);
            inner.current_pause = None;
            thread.resumed.notify_all();
            tracing::debug!(pause_id, ?mode, thread = thread.key, "thread resumed");
            return true;
        }
        tracing::debug!(pause_id, ?mode, "stale resume ignored");
        false
    }

    fn apply_resume(&self, inner: &mut MutexGuard<'_, ThreadInner>, mode: ResumeMode) {
        clear_step(inner);
        match mode {
            ResumeMode::Continue => {}
            ResumeMode::StepInto => inner.step = StepMode::Into,
            ResumeMode::StepOver => {
                if inner.frames.is_empty() {
                    // Nothing to key the target off; fall back to step-into.
                    inner.step = StepMode::Into;
                    return;
                }
                let depth = inner.frames.len();
                let top = inner.frames.last().expect("non-empty frame stack");
                let next = top.last_checkpoint.and_then(|current| {
                    self.maps.methods.get(&top.method_name).and_then(|ids| {
                        match ids.iter().position(|&x| x == current) {
                            Some(i) => ids.get(i + 1).copied(),
                            // Current id missing from the method's list: take
                            // the first id strictly greater than it.
                            None => ids.iter().copied().find(|&x| x > current),
                        }
                    })
                });
                match next {
                    Some(next_id) => {
                        inner.step = StepMode::Over;
                        inner.run_until = Some(next_id);
                    }
                    // Last statement of the method: pause right after the
                    // frame returns to its caller.
                    None => inner.pause_on_pop_to_depth = Some(depth.saturating_sub(1)),
                }
            }
            ResumeMode::StepOut => {
                let depth = inner.frames.len();
                inner.step = StepMode::Out;
                inner.pause_on_pop_to_depth = Some(depth.saturating_sub(1));
            }
        }
    }

    /// Last pause snapshot recorded for the thread that paused under
    /// `pause_id`, if it is still paused.
    pub fn paused_frame(&self, pause_id: PauseId) -> Option<FrameSnapshot> {
        self.threads.iter().find_map(|entry| {
            let inner = entry.value().inner.lock();
            (inner.current_pause == Some(pause_id))
                .then(|| inner.last_paused.clone())
                .flatten()
        })
    }

    // ── Per-thread state ────────────────────────────────────────────────

    fn thread_state(&self) -> Arc<ScriptThread> {
        let id = std::thread::current().id();
        self.threads
            .entry(id)
            .or_insert_with(|| {
                Arc::new(ScriptThread {
                    key: self.next_thread_key.fetch_add(1, Ordering::Relaxed),
                    inner: Mutex::new(ThreadInner {
                        frames: Vec::new(),
                        step: StepMode::None,
                        run_until: None,
                        pause_on_pop_to_depth: None,
                        pause_next: false,
                        current_pause: None,
                        last_paused: None,
                    }),
                    resumed: Condvar::new(),
                })
            })
            .clone()
    }

    /// Run a locals provider before any engine lock is taken. Provider
    /// failures produce an empty locals list plus a diagnostic.
    fn snapshot_locals(
        provider: Option<LocalsProvider<'_>>,
    ) -> (Option<LocalsPairs>, Option<String>) {
        match provider {
            None => (None, None),
            Some(p) => match p() {
                Ok(pairs) => (Some(pairs), None),
                Err(e) => {
                    tracing::warn!(error = %e, "locals provider failed");
                    (Some(Vec::new()), Some(e.to_string()))
                }
            },
        }
    }
}

fn clear_step(inner: &mut MutexGuard<'_, ThreadInner>) {
    inner.step = StepMode::None;
    inner.run_until = None;
    inner.pause_on_pop_to_depth = None;
}

impl DebugHost for DebugEngine {
    fn push_frame(&self, method: &str, provider: Option<LocalsProvider<'_>>) {
        let (locals, _) = Self::snapshot_locals(provider);
        let thread = self.thread_state();
        let mut inner = thread.inner.lock();
        inner.frames.push(FrameInfo {
            method_name: method.to_string(),
            locals: locals.unwrap_or_default(),
            last_checkpoint: None,
        });
    }

    fn pop_frame(&self) {
        let thread = self.thread_state();
        let mut inner = thread.inner.lock();
        inner.frames.pop();
        if let Some(target) = inner.pause_on_pop_to_depth {
            if inner.frames.len() <= target {
                inner.pause_on_pop_to_depth = None;
                inner.pause_next = true;
            }
        }
    }

    fn checkpoint(&self, id: CheckpointId, method: &str, provider: Option<LocalsProvider<'_>>) {
        // The provider runs user code; keep it outside every lock.
        let (locals_update, diagnostic) = Self::snapshot_locals(provider);

        let thread = self.thread_state();
        let mut inner = thread.inner.lock();

        // Update the top frame, or synthesize a transient view for callbacks
        // arriving outside any frame.
        let (frame_method, frame_locals) = match inner.frames.last_mut() {
            Some(frame) => {
                if let Some(pairs) = locals_update {
                    frame.locals = pairs;
                }
                frame.last_checkpoint = Some(id);
                (frame.method_name.clone(), frame.locals.clone())
            }
            None => (method.to_string(), locals_update.unwrap_or_default()),
        };

        let breakpoint_hit = self.breakpoints.read().contains(&id);
        let step_hit = if inner.pause_next {
            inner.pause_next = false;
            clear_step(&mut inner);
            true
        } else {
            match inner.step {
                StepMode::Into => {
                    clear_step(&mut inner);
                    true
                }
                StepMode::Over if inner.run_until == Some(id) => {
                    clear_step(&mut inner);
                    true
                }
                // Step-out pauses via the pop handshake, never here.
                _ => false,
            }
        };

        if !breakpoint_hit && !step_hit {
            return;
        }

        let reason = if breakpoint_hit {
            PauseReason::Breakpoint(id)
        } else {
            PauseReason::Step
        };
        let pause_id = self.next_pause_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = FrameSnapshot {
            method_name: frame_method,
            checkpoint_id: Some(id),
            locals: frame_locals,
            diagnostic,
        };
        inner.current_pause = Some(pause_id);
        inner.last_paused = Some(snapshot.clone());
        let depth = inner.frames.len();

        tracing::debug!(
            pause_id,
            thread = thread.key,
            checkpoint = id,
            ?reason,
            depth,
            "thread paused"
        );
        let _ = self.events.send(PauseEvent {
            pause_id,
            thread_key: thread.key,
            reason,
            frame: snapshot,
            depth,
        });

        while inner.current_pause == Some(pause_id) {
            thread.resumed.wait(&mut inner);
        }
    }
}
