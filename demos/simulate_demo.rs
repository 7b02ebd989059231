//! Demonstration of the ingestion pipeline without hardware.
//!
//! This example shows how to:
//! 1. Wire the retention store and window buffer into the arbiter
//! 2. Stand in for the device with an in-memory link
//! 3. Switch between hardware and simulation mode
//! 4. Watch readings arrive through the event bus
//!
//! Run with: cargo run --example simulate_demo

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sensor_window::{
    core::read_buffer, create_shared_buffer, create_shared_log, create_shared_store,
    source::MemoryTransport, Channel, EventBus, Mode, PipelineEvent, RetentionStore, Scheduler,
    SourceArbiter, SyntheticGenerator, Timings, WindowBuffer,
};

fn main() {
    println!("sensor-window - Simulation Demo");
    println!("===============================");
    println!();

    let store = match RetentionStore::open_in_memory() {
        Ok(store) => create_shared_store(store),
        Err(e) => {
            eprintln!("Error opening store: {e}");
            return;
        }
    };
    let buffer = create_shared_buffer(WindowBuffer::new(10));
    let stats = create_shared_log();
    let events = EventBus::new();
    let subscriber = events.subscribe();

    let generator = SyntheticGenerator::new(Duration::from_millis(250));
    let mut arbiter = SourceArbiter::new(generator, events, stats.clone());
    arbiter.add_sink(store.clone());
    arbiter.add_sink(buffer.clone());

    // The in-memory link plays the board: it sends two hardware lines first.
    let (transport, board) = MemoryTransport::pair();
    if let Err(e) = arbiter.attach("demo-board", Box::new(transport)) {
        eprintln!("Error attaching link: {e}");
        return;
    }
    board.feed_line("0,850");
    board.feed_line("1,1523");
    board.feed_line("0,abc");

    let mut scheduler = Scheduler::new(
        arbiter,
        buffer.clone(),
        Some(store),
        stats.clone(),
        Timings::default(),
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    println!("Hardware mode for 1 second, then simulation for 5 seconds...");
    println!();

    let start = Instant::now();
    let mut switched = false;
    while running.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(6) {
        if !switched && start.elapsed() >= Duration::from_secs(1) {
            println!("  -> switching to simulation mode");
            if let Err(e) = scheduler.arbiter_mut().set_mode(Mode::Simulation) {
                eprintln!("Error starting generator: {e}");
                break;
            }
            switched = true;
        }

        for _ in 0..10 {
            scheduler.run_due(Instant::now());
            std::thread::sleep(Duration::from_millis(10));
        }

        for event in subscriber.try_iter() {
            match event {
                PipelineEvent::Reading(reading) => println!(
                    "  [{}] thermal {} | light {}",
                    reading.timestamp.format("%H:%M:%S%.3f"),
                    reading.thermal_state().label(),
                    reading.light
                ),
                PipelineEvent::Status(status) => println!("  status: {}", status.message),
            }
        }
    }

    scheduler.shutdown();
    for event in subscriber.try_iter() {
        if let PipelineEvent::Status(status) = event {
            println!("  status: {}", status.message);
        }
    }

    let window = read_buffer(&buffer);
    println!();
    println!("Window holds {} readings", window.len());
    if let Some(light) = window.current(Channel::Light) {
        println!("Current light level: {}", light.value);
    }
    println!();
    println!("{}", stats.summary());
}
