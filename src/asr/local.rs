//! On-device recognition engine
//!
//! Wraps a continuous host recognizer whose tasks self-terminate under
//! platform duration/silence limits. When a task ends while the session is
//! still active the engine re-arms: it flushes the task's accumulated text as
//! a final result, constructs a fresh request bound to the same running tap,
//! and accumulates the next task from empty. Capture is never stopped for a
//! re-arm.
//!
//! A fixed set of benign termination codes triggers the re-arm; anything else
//! is session-fatal. The re-arm loop is bounded by an explicit restart policy
//! so a recognizer that keeps dying without producing results cannot restart
//! forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::RecognitionEvent;
use crate::audio::{AudioFrame, CaptureEvent};
use crate::error::SessionError;

/// Termination codes the host recognizer emits for ordinary task turnover
/// (no-speech timeout, task superseded, service-side session rotation).
pub const BENIGN_TERMINATION_CODES: [i32; 3] = [209, 216, 1110];

const EVENT_CAPACITY: usize = 64;

/// Events reported by one recognition task. A task's text is cumulative: each
/// report carries the task's entire output since its own start.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Partial(String),
    Final(String),
    Terminated { code: i32, message: String },
}

/// One armed recognition request: audio in, task events out.
pub struct RecognizerTask {
    pub audio: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<TaskEvent>,
}

/// Injected seam over the host speech facility. Each call arms a fresh
/// recognition request against the shared tap.
pub trait RecognizerFactory: Send + Sync {
    fn begin_task(&self) -> Result<RecognizerTask, SessionError>;
}

/// Bounded re-arm behavior; a first-class parameter so tests can compress it.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Pause before re-arming after a benign termination.
    pub delay: Duration,
    /// Consecutive re-arms without any recognition result before the engine
    /// gives up.
    pub max_consecutive: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(300),
            max_consecutive: 5,
        }
    }
}

pub struct LocalRecognitionEngine {
    factory: Arc<dyn RecognizerFactory>,
    policy: RestartPolicy,
    // Replaced on every start so a stale finish permit cannot leak into the
    // next session.
    finish: StdMutex<Arc<Notify>>,
    finish_requested: AtomicBool,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl LocalRecognitionEngine {
    pub fn new(factory: Arc<dyn RecognizerFactory>, policy: RestartPolicy) -> Self {
        Self {
            factory,
            policy,
            finish: StdMutex::new(Arc::new(Notify::new())),
            finish_requested: AtomicBool::new(false),
            driver: StdMutex::new(None),
        }
    }

    /// Arm the first task and run the re-arm loop. Returns the recognition
    /// event stream.
    pub fn start(
        &self,
        audio_rx: mpsc::Receiver<CaptureEvent>,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, SessionError> {
        let first_task = self.factory.begin_task()?;

        let finish = Arc::new(Notify::new());
        *self.finish.lock().unwrap_or_else(|p| p.into_inner()) = finish.clone();
        self.finish_requested.store(false, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let driver = LocalDriver {
            factory: self.factory.clone(),
            policy: self.policy.clone(),
            finish,
            events: event_tx,
        };
        let handle = tokio::spawn(driver.run(first_task, audio_rx));
        *self.driver.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(event_rx)
    }

    /// End the session: flush the current task's text as a final result and
    /// complete the event stream. Idempotent.
    pub fn finish(&self) {
        if !self.finish_requested.swap(true, Ordering::SeqCst) {
            self.finish
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .notify_one();
        }
    }

    pub fn release(&self) {
        if let Some(handle) = self.driver.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

struct LocalDriver {
    factory: Arc<dyn RecognizerFactory>,
    policy: RestartPolicy,
    finish: Arc<Notify>,
    events: mpsc::Sender<RecognitionEvent>,
}

impl LocalDriver {
    async fn run(self, mut task: RecognizerTask, mut audio_rx: mpsc::Receiver<CaptureEvent>) {
        let _ = self.events.send(RecognitionEvent::Started).await;

        // The current task's entire output since its own start.
        let mut task_text = String::new();
        let mut silent_restarts = 0u32;
        let mut audio_open = true;

        loop {
            tokio::select! {
                event = task.events.recv() => {
                    match event {
                        Some(TaskEvent::Partial(text)) => {
                            task_text = text;
                            let _ = self
                                .events
                                .send(RecognitionEvent::Transcript {
                                    text: task_text.clone(),
                                    is_final: false,
                                })
                                .await;
                        }
                        Some(TaskEvent::Final(text)) => {
                            task_text = text;
                            self.flush_boundary(&mut task_text).await;
                            silent_restarts = 0;
                            // Terminal final while still active: re-arm at once.
                            match self.rearm(None).await {
                                Some(next) => task = next,
                                None => break,
                            }
                        }
                        Some(TaskEvent::Terminated { code, message }) => {
                            if BENIGN_TERMINATION_CODES.contains(&code) {
                                tracing::debug!(code, "benign recognizer termination, re-arming");
                                if task_text.is_empty() {
                                    silent_restarts += 1;
                                    if silent_restarts > self.policy.max_consecutive {
                                        let _ = self
                                            .events
                                            .send(RecognitionEvent::Failed(SessionError::engine(
                                                code,
                                                "recognizer restarting without producing results",
                                            )))
                                            .await;
                                        break;
                                    }
                                } else {
                                    silent_restarts = 0;
                                }
                                self.flush_boundary(&mut task_text).await;
                                match self.rearm(Some(self.policy.delay)).await {
                                    Some(next) => task = next,
                                    None => break,
                                }
                            } else {
                                self.flush_boundary(&mut task_text).await;
                                let _ = self
                                    .events
                                    .send(RecognitionEvent::Failed(SessionError::Engine {
                                        code,
                                        message,
                                    }))
                                    .await;
                                break;
                            }
                        }
                        None => {
                            // Host dropped the task without a terminal event;
                            // treat like a silent benign termination.
                            if task_text.is_empty() {
                                silent_restarts += 1;
                                if silent_restarts > self.policy.max_consecutive {
                                    let _ = self
                                        .events
                                        .send(RecognitionEvent::Failed(SessionError::engine(
                                            0,
                                            "recognizer restarting without producing results",
                                        )))
                                        .await;
                                    break;
                                }
                            } else {
                                silent_restarts = 0;
                            }
                            self.flush_boundary(&mut task_text).await;
                            match self.rearm(Some(self.policy.delay)).await {
                                Some(next) => task = next,
                                None => break,
                            }
                        }
                    }
                }
                capture = audio_rx.recv(), if audio_open => {
                    match capture {
                        Some(CaptureEvent::Frame(frame)) => {
                            // The tap outlives individual tasks; frames always
                            // go to whichever task is currently armed.
                            let _ = task.audio.try_send(frame);
                        }
                        Some(CaptureEvent::Level(level)) => {
                            let _ = self.events.try_send(RecognitionEvent::Level(level));
                        }
                        None => audio_open = false,
                    }
                }
                _ = self.finish.notified() => {
                    self.flush_boundary(&mut task_text).await;
                    let _ = self.events.send(RecognitionEvent::Finished).await;
                    break;
                }
            }
        }
    }

    /// Emit the task's accumulated text as a final result at a re-arm or
    /// session boundary, then reset the accumulator.
    async fn flush_boundary(&self, task_text: &mut String) {
        if task_text.is_empty() {
            return;
        }
        let text = std::mem::take(task_text);
        let _ = self
            .events
            .send(RecognitionEvent::Transcript {
                text,
                is_final: true,
            })
            .await;
    }

    async fn rearm(&self, delay: Option<Duration>) -> Option<RecognizerTask> {
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        match self.factory.begin_task() {
            Ok(task) => Some(task),
            Err(e) => {
                let _ = self.events.send(RecognitionEvent::Failed(e)).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted recognizer: each armed task plays back a fixed event list and
    /// then stays open (like a host task waiting for more speech).
    struct ScriptedFactory {
        scripts: StdMutex<Vec<Vec<TaskEvent>>>,
        begun: StdMutex<u32>,
        // Keep task senders alive so event channels never close mid-test.
        keepalive: StdMutex<Vec<mpsc::Sender<TaskEvent>>>,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Vec<TaskEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(scripts),
                begun: StdMutex::new(0),
                keepalive: StdMutex::new(Vec::new()),
            })
        }

        fn tasks_begun(&self) -> u32 {
            *self.begun.lock().unwrap()
        }
    }

    impl RecognizerFactory for ScriptedFactory {
        fn begin_task(&self) -> Result<RecognizerTask, SessionError> {
            *self.begun.lock().unwrap() += 1;
            let mut scripts = self.scripts.lock().unwrap();
            let script = if scripts.is_empty() {
                Vec::new()
            } else {
                scripts.remove(0)
            };

            let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
            let (audio_tx, _audio_rx) = mpsc::channel::<AudioFrame>(EVENT_CAPACITY);
            let task = RecognizerTask {
                audio: audio_tx,
                events: event_rx,
            };
            self.keepalive.lock().unwrap().push(event_tx.clone());
            tokio::spawn(async move {
                for event in script {
                    let _ = event_tx.send(event).await;
                }
            });
            Ok(task)
        }
    }

    fn policy_for_tests() -> RestartPolicy {
        RestartPolicy {
            delay: Duration::from_millis(1),
            max_consecutive: 3,
        }
    }

    async fn collect_until_terminal(
        events: &mut mpsc::Receiver<RecognitionEvent>,
    ) -> (Vec<String>, Option<SessionError>) {
        let mut finals = Vec::new();
        let mut error = None;
        while let Some(event) = events.recv().await {
            match event {
                RecognitionEvent::Transcript { text, is_final: true } => finals.push(text),
                RecognitionEvent::Failed(e) => {
                    error = Some(e);
                    break;
                }
                RecognitionEvent::Finished => break,
                _ => {}
            }
        }
        (finals, error)
    }

    #[tokio::test]
    async fn three_benign_terminations_cause_exactly_three_rearms() {
        let factory = ScriptedFactory::new(vec![
            vec![
                TaskEvent::Partial("alpha".into()),
                TaskEvent::Terminated { code: 1110, message: "no speech".into() },
            ],
            vec![
                TaskEvent::Partial("beta".into()),
                TaskEvent::Terminated { code: 216, message: "superseded".into() },
            ],
            vec![
                TaskEvent::Partial("gamma".into()),
                TaskEvent::Terminated { code: 209, message: "rotated".into() },
            ],
            vec![],
        ]);

        let engine = LocalRecognitionEngine::new(factory.clone(), policy_for_tests());
        let (_capture_tx, capture_rx) = mpsc::channel(8);
        let mut events = engine.start(capture_rx).unwrap();

        // Wait until the last scripted task is armed, then end the session.
        let engine = Arc::new(engine);
        let finisher = engine.clone();
        let factory_watch = factory.clone();
        tokio::spawn(async move {
            while factory_watch.tasks_begun() < 4 {
                sleep(Duration::from_millis(5)).await;
            }
            finisher.finish();
        });

        let (finals, error) = collect_until_terminal(&mut events).await;
        assert!(error.is_none(), "benign restarts must never surface: {:?}", error);
        assert_eq!(factory.tasks_begun(), 4, "initial arm plus three re-arms");
        assert_eq!(finals.join(" "), "alpha beta gamma");
    }

    #[tokio::test]
    async fn unrecognized_code_is_session_fatal_but_keeps_confirmed_text() {
        let factory = ScriptedFactory::new(vec![vec![
            TaskEvent::Partial("kept".into()),
            TaskEvent::Terminated { code: 42, message: "exploded".into() },
        ]]);

        let engine = LocalRecognitionEngine::new(factory.clone(), policy_for_tests());
        let (_capture_tx, capture_rx) = mpsc::channel(8);
        let mut events = engine.start(capture_rx).unwrap();

        let (finals, error) = collect_until_terminal(&mut events).await;
        assert_eq!(finals, vec!["kept".to_string()]);
        assert!(
            matches!(error, Some(SessionError::Engine { code: 42, .. })),
            "got {:?}",
            error
        );
        assert_eq!(factory.tasks_begun(), 1, "fatal errors are never retried");
    }

    #[tokio::test]
    async fn finish_before_any_result_completes_with_nothing() {
        let factory = ScriptedFactory::new(vec![vec![]]);
        let engine = LocalRecognitionEngine::new(factory.clone(), policy_for_tests());
        let (_capture_tx, capture_rx) = mpsc::channel(8);
        let mut events = engine.start(capture_rx).unwrap();

        engine.finish();
        engine.finish(); // idempotent

        let (finals, error) = collect_until_terminal(&mut events).await;
        assert!(finals.is_empty());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn silent_restart_storm_is_bounded_by_policy() {
        let scripts = (0..10)
            .map(|_| {
                vec![TaskEvent::Terminated { code: 1110, message: "no speech".into() }]
            })
            .collect();
        let factory = ScriptedFactory::new(scripts);

        let engine = LocalRecognitionEngine::new(factory.clone(), policy_for_tests());
        let (_capture_tx, capture_rx) = mpsc::channel(8);
        let mut events = engine.start(capture_rx).unwrap();

        let (finals, error) = collect_until_terminal(&mut events).await;
        assert!(finals.is_empty());
        assert!(matches!(error, Some(SessionError::Engine { .. })));
        // Initial arm plus max_consecutive re-arms, then the engine gives up.
        assert_eq!(factory.tasks_begun(), 1 + 3);
    }
}
