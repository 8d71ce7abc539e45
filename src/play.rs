use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use midly::{MidiMessage, Smf, Timing, TrackEventKind};
use midi_session::{note_name, NotePlayer};

const TICK: Duration = Duration::from_millis(10);

/// A scheduled note-on or note-off, timed in beats from the start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteToggle {
    pub beat: f64,
    pub off: bool,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub program: Option<u8>,
}

/// Collects every note toggle of a metrical SMF, sorted by time with
/// releases ahead of presses at the same instant.
///
/// Program changes apply only to later notes on the same track and
/// channel. A format 1 file that keeps its program changes on a separate
/// track plays those notes without a program.
pub fn schedule(smf: &Smf) -> Result<Vec<NoteToggle>> {
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ticks) if ticks.as_int() > 0 => ticks.as_int() as f64,
        Timing::Metrical(_) => bail!("file declares zero ticks per beat"),
        Timing::Timecode(..) => bail!("SMPTE-timed files are not supported"),
    };

    let mut toggles = Vec::new();
    for track in &smf.tracks {
        let mut ticks: u64 = 0;
        let mut programs: [Option<u8>; 16] = [None; 16];

        for event in track {
            ticks += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            let beat = ticks as f64 / ticks_per_beat;

            let (pitch, velocity, off) = match message {
                MidiMessage::ProgramChange { program } => {
                    programs[channel as usize] = Some(program.as_int());
                    continue;
                }
                MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int(), vel.as_int() == 0),
                MidiMessage::NoteOff { key, vel } => (key.as_int(), vel.as_int(), true),
                _ => continue,
            };

            toggles.push(NoteToggle {
                beat,
                off,
                pitch,
                velocity,
                channel,
                program: programs[channel as usize],
            });
        }
    }

    toggles.sort_by(|a, b| a.beat.total_cmp(&b.beat).then(b.off.cmp(&a.off)));
    Ok(toggles)
}

/// Prints the schedule as a table.
pub fn print_schedule(toggles: &[NoteToggle]) {
    println!(
        "{:>10}  {:<5}  {:<14}  {:>8}  {:>10}",
        "Time", "State", "Pitch (Note)", "Velocity", "Instrument"
    );
    for toggle in toggles {
        let instrument = toggle
            .program
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10.3}  {:<5}  {:<14}  {:>8}  {:>10}",
            toggle.beat,
            if toggle.off { "off" } else { "on" },
            format!("{} ({})", toggle.pitch, note_name(toggle.pitch)),
            toggle.velocity,
            instrument
        );
    }
}

/// Plays the schedule in real time at `bpm`, checking the clock every
/// 10 ms. Returns early when `running` is cleared.
pub fn play(player: &NotePlayer, toggles: &[NoteToggle], bpm: u32, running: &AtomicBool) -> Result<()> {
    if bpm == 0 {
        bail!("bpm must be greater than zero");
    }
    let seconds_per_beat = 60.0 / bpm as f64;
    let start = Instant::now();
    let mut pending = toggles.iter().peekable();

    while running.load(Ordering::SeqCst) {
        let elapsed = start.elapsed().as_secs_f64();
        while let Some(toggle) = pending.next_if(|t| elapsed >= t.beat * seconds_per_beat) {
            player.play_note(
                toggle.pitch,
                toggle.velocity,
                toggle.channel,
                toggle.program,
                toggle.off,
            )?;
        }

        if pending.peek().is_none() {
            break;
        }
        thread::sleep(TICK);
    }
    Ok(())
}
