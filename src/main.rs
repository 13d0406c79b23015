use seq_backend::io::MidiOutput;
use seq_backend::seq::runner::NullSink;
use seq_backend::seq::{ClockStepInfo, Engine, MidiSink};
use seq_backend::tui;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shared timebase for clock steps and captured input, in microseconds.
/// Wraps at the u32 boundary the way the hardware timer does.
fn now_us() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u32)
        .unwrap_or(0)
}

fn main() {
    env_logger::init();

    let (engine, controller) = Engine::new();
    let quit = Arc::new(AtomicBool::new(false));

    let engine_quit = Arc::clone(&quit);
    let engine_thread = thread::spawn(move || run_engine(engine, engine_quit));

    if let Err(err) = tui::run(controller, now_us) {
        eprintln!("monitor error: {}", err);
    }

    quit.store(true, Ordering::Relaxed);
    let _ = engine_thread.join();
    println!("Goodbye!");
}

/// Sequencer thread: internal 1/16 clock driving the engine, MIDI out
/// through a virtual port when one can be opened.
fn run_engine(mut engine: Engine, quit: Arc<AtomicBool>) {
    let mut midi: Box<dyn MidiSink + Send> = match MidiOutput::new("seq-backend") {
        Ok(output) => Box::new(output),
        Err(err) => {
            eprintln!("MIDI output unavailable ({}), running silent", err);
            Box::new(NullSink)
        }
    };
    let mut cart = NullSink;

    let started = Instant::now();
    let mut step_idx: u32 = 0;
    let mut next_step = started;

    loop {
        if quit.load(Ordering::Relaxed) {
            break;
        }

        let tempo = engine.project().tempo.max(20) as f32;
        let step_duration = Duration::from_secs_f32(60.0 / (tempo * 4.0));

        let now = Instant::now();
        if now < next_step {
            engine.idle(midi.as_mut());
            thread::sleep(Duration::from_millis(1).min(next_step - now));
            continue;
        }

        if engine.is_running() {
            let info = ClockStepInfo {
                now: now_us(),
                step_idx_abs: step_idx,
                bpm: tempo,
                tick_duration: (step_duration.as_micros() / 6) as u32,
                step_duration: step_duration.as_micros() as u32,
                external: false,
            };
            engine.on_clock_step(&info, midi.as_mut(), &mut cart);
            step_idx = step_idx.wrapping_add(1);
        } else {
            engine.idle(midi.as_mut());
            step_idx = 0;
        }

        next_step += step_duration;
        // Resync after long stalls instead of bursting catch-up steps.
        if Instant::now() > next_step + step_duration * 4 {
            next_step = Instant::now();
        }
    }

    // Hanging notes die with the process otherwise.
    engine.shutdown(midi.as_mut());
}
