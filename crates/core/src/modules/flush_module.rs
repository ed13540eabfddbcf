use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
use crate::cabinet::{Cabinet, FlushReport};
use crate::config::Settings;
use crate::sink::OutputSink;

/// Upper bound for the idle frame pushed on shutdown.
pub const FINAL_FRAME_BUDGET: Duration = Duration::from_millis(250);

/// Pushes the cabinet to the output sink at a fixed frame rate, the same way
/// a DMX interface is refreshed. Runs away from event intake so a stalled
/// device never blocks table events.
pub struct FlushModule {
    cabinet: Arc<Cabinet>,
    sink: Arc<dyn OutputSink>,
    target_hz: u32,
    sink_timeout: Duration,
    frames_flushed: u64,
    failed_writes: u64,
    stopping: Arc<AtomicBool>,
    status: HashMap<String, String>,
}

impl FlushModule {
    pub fn new(cabinet: Arc<Cabinet>, sink: Arc<dyn OutputSink>, settings: &Settings) -> Self {
        Self {
            cabinet,
            sink,
            target_hz: settings.flush_hz.max(1),
            sink_timeout: settings.sink_timeout(),
            frames_flushed: 0,
            failed_writes: 0,
            stopping: Arc::new(AtomicBool::new(false)),
            status: HashMap::new(),
        }
    }

    /// Flag that cuts the frame in progress short once set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopping.clone()
    }

    async fn flush_frame(&mut self) -> FlushReport {
        let stopping = self.stopping.clone();
        let report = self
            .cabinet
            .flush_while(self.sink.as_ref(), self.sink_timeout, || {
                !stopping.load(Ordering::SeqCst)
            })
            .await;
        self.record(&report);
        report
    }

    /// Idle frame on shutdown, bounded by [`FINAL_FRAME_BUDGET`].
    async fn final_frame(&mut self) -> FlushReport {
        let deadline = Instant::now() + FINAL_FRAME_BUDGET;
        let report = self
            .cabinet
            .flush_while(self.sink.as_ref(), self.sink_timeout, || {
                Instant::now() < deadline
            })
            .await;
        self.record(&report);
        report
    }

    fn record(&mut self, report: &FlushReport) {
        self.frames_flushed += 1;
        self.failed_writes += report.failed as u64;
    }

    /// Flush once from synchronous code, within [`FINAL_FRAME_BUDGET`]. Runs
    /// on a scoped thread with its own runtime, so it is safe to call from
    /// inside or outside a tokio context.
    pub fn flush_blocking(
        cabinet: &Cabinet,
        sink: &dyn OutputSink,
        timeout: Duration,
    ) -> FlushReport {
        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build()
                    {
                        Ok(runtime) => {
                            let deadline = Instant::now() + FINAL_FRAME_BUDGET;
                            runtime.block_on(
                                cabinet.flush_while(sink, timeout, || Instant::now() < deadline),
                            )
                        }
                        Err(e) => {
                            log::error!("Failed to build flush runtime: {}", e);
                            FlushReport::default()
                        }
                    }
                })
                .join()
                .unwrap_or_else(|_| {
                    log::error!("Flush thread panicked");
                    FlushReport::default()
                })
        })
    }
}

#[async_trait]
impl AsyncModule for FlushModule {
    fn id(&self) -> ModuleId {
        ModuleId::Flush
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Initializing flush module: {} outputs at {}Hz",
            self.cabinet.len(),
            self.target_hz
        );

        self.status
            .insert("outputs".to_string(), self.cabinet.len().to_string());
        self.status
            .insert("status".to_string(), "initialized".to_string());

        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::Receiver<ModuleEvent>,
        tx: mpsc::Sender<ModuleMessage>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let frame_duration = Duration::from_secs_f64(1.0 / self.target_hz as f64);
        let mut frame_interval = interval(frame_duration);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Flush module started, running at {}Hz", self.target_hz);

        let _ = tx
            .send(ModuleMessage::Status(format!(
                "Flush module running at {}Hz",
                self.target_hz
            )))
            .await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ModuleEvent::FlushNow) => {
                            self.flush_frame().await;
                        }
                        Some(ModuleEvent::Shutdown) | None => {
                            log::info!("Flush module received shutdown signal");
                            break;
                        }
                    }
                }

                _ = frame_interval.tick() => {
                    let report = self.flush_frame().await;
                    if !report.is_clean() {
                        let _ = tx.try_send(ModuleMessage::Error(format!(
                            "{} sink writes failed, retrying next frame",
                            report.failed
                        )));
                    }

                    // Update status every 5 seconds
                    if self.frames_flushed % (self.target_hz as u64 * 5) == 0 {
                        self.status.insert("frames_flushed".to_string(), self.frames_flushed.to_string());
                        self.status.insert("failed_writes".to_string(), self.failed_writes.to_string());
                        let _ = tx.try_send(ModuleMessage::Status(format!(
                            "Flush: {} frames, {} failed writes",
                            self.frames_flushed,
                            self.failed_writes
                        )));
                    }
                }
            }
        }

        // Final frame so idle values reach the hardware
        let report = self.final_frame().await;
        log::info!(
            "Flush module stopping after {} frames ({} idle writes failed, {} not sent)",
            self.frames_flushed,
            report.failed,
            report.skipped
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        log::info!("Flush module shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        self.status.clone()
    }
}

/// Owns the thread the flush module runs on.
pub struct FlushDriver {
    stopping: Arc<AtomicBool>,
    events: Option<mpsc::Sender<ModuleEvent>>,
    thread: Option<JoinHandle<()>>,
}

impl FlushDriver {
    pub fn start(mut module: FlushModule) -> std::io::Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (message_tx, mut message_rx) = mpsc::channel(64);
        let stopping = module.stop_flag();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let thread = std::thread::Builder::new()
            .name("tilt-flush".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let id = module.id();
                    if let Err(e) = module.initialize().await {
                        log::error!("Failed to initialize module {:?}: {}", id, e);
                        return;
                    }

                    tokio::spawn(async move {
                        while let Some(message) = message_rx.recv().await {
                            match message {
                                ModuleMessage::Status(status) => log::debug!("{}", status),
                                ModuleMessage::Error(error) => log::warn!("{}", error),
                            }
                        }
                    });

                    if let Err(e) = module.run(event_rx, message_tx).await {
                        log::error!("Module {:?} error: {}", id, e);
                    }
                    if let Err(e) = module.shutdown().await {
                        log::error!("Module {:?} shutdown error: {}", id, e);
                    }
                });
            })?;

        Ok(Self {
            stopping,
            events: Some(event_tx),
            thread: Some(thread),
        })
    }

    /// Ask for an immediate flush. Dropped if the module is busy.
    pub fn request_flush(&self) {
        if let Some(events) = &self.events {
            let _ = events.try_send(ModuleEvent::FlushNow);
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the module after its current write and wait for the final frame.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(events) = self.events.take() {
            // Closing the channel stops the loop even when the queue is full
            let _ = events.try_send(ModuleEvent::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Flush thread panicked");
            }
        }
    }
}

impl Drop for FlushDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn settings() -> Settings {
        Settings {
            flush_hz: 200,
            sink_timeout_ms: 20,
            ..Settings::default()
        }
    }

    #[test]
    fn test_driver_flushes_and_stops() {
        let cabinet = Arc::new(Cabinet::default());
        let sink = Arc::new(MemorySink::new());
        let handle = cabinet.register("Beacon");

        let mut driver =
            FlushDriver::start(FlushModule::new(cabinet.clone(), sink.clone(), &settings())).unwrap();
        cabinet.write(handle, 180).unwrap();
        driver.request_flush();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.value("Beacon"), Some(180));

        cabinet.write(handle, 0).unwrap();
        driver.stop();
        assert!(!driver.is_running());
        assert_eq!(sink.value("Beacon"), Some(0));

        // Second stop is a no-op
        driver.stop();
    }

    #[tokio::test]
    async fn test_module_status() {
        let cabinet = Arc::new(Cabinet::default());
        cabinet.register("Beacon");
        let mut module = FlushModule::new(cabinet, Arc::new(MemorySink::new()), &settings());

        module.initialize().await.unwrap();
        assert_eq!(module.id(), ModuleId::Flush);
        assert_eq!(module.status().get("outputs").map(String::as_str), Some("1"));

        module.shutdown().await.unwrap();
        assert_eq!(module.status().get("status").map(String::as_str), Some("shutdown"));
    }

    #[test]
    fn test_flush_blocking() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        let handle = cabinet.register("Shaker");
        cabinet.write(handle, 77).unwrap();

        let report = FlushModule::flush_blocking(&cabinet, &sink, Duration::from_millis(20));
        assert_eq!(report.written, 1);
        assert_eq!(sink.value("Shaker"), Some(77));
    }

    #[tokio::test]
    async fn test_flush_blocking_inside_runtime() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        cabinet.register("Shaker");

        let report = FlushModule::flush_blocking(&cabinet, &sink, Duration::from_millis(20));
        assert!(report.is_clean());
        assert_eq!(sink.value("Shaker"), Some(0));
    }

    #[test]
    fn test_stop_with_stalled_sink_is_bounded() {
        let cabinet = Arc::new(Cabinet::default());
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (1..=32)
            .map(|n| cabinet.register(&format!("LedWiz 1\\{:02}", n)))
            .collect();

        let settings = Settings {
            flush_hz: 60,
            sink_timeout_ms: 50,
            ..Settings::default()
        };
        sink.set_stall(Some(Duration::from_millis(500)));
        let mut driver =
            FlushDriver::start(FlushModule::new(cabinet.clone(), sink.clone(), &settings)).unwrap();
        for handle in &handles {
            cabinet.write(*handle, 255).unwrap();
        }
        std::thread::sleep(Duration::from_millis(120));

        let started = Instant::now();
        driver.stop();
        // Current write, then an idle frame capped by its budget
        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(cabinet.dirty_count() > 0);
    }
}
