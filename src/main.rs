mod app;
mod play;
mod ui;

use anyhow::{bail, Context, Result};
use app::App;
use clap::{Parser, Subcommand};
use crossbeam::channel::{self, RecvTimeoutError};
use crossterm::{
    event::{
        self, Event, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use log::{info, warn};
use midi_session::{
    callback, DeviceFilter, DeviceId, Direction, MidiContext, PollerEvent, Session,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "midi-session", version, about = "Send and receive MIDI events")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List MIDI devices
    #[command(visible_alias = "l")]
    List {
        /// Only input devices
        #[arg(long, conflicts_with = "outputs")]
        inputs: bool,
        /// Only output devices
        #[arg(long)]
        outputs: bool,
    },

    /// Play a Standard MIDI File
    #[command(visible_alias = "p")]
    Play {
        /// MIDI output device id
        #[arg(long)]
        output: Option<usize>,
        /// Beats per minute
        #[arg(long, default_value_t = 80)]
        bpm: u32,
        /// Print the note schedule before playing
        #[arg(long)]
        show_notes: bool,
        /// The .mid file to play
        file: PathBuf,
    },

    /// Show incoming notes on screen
    #[command(visible_alias = "s")]
    Show {
        /// MIDI input device id
        #[arg(long)]
        input: Option<usize>,
        /// MIDI output device id to echo notes to
        #[arg(long)]
        output: Option<usize>,
        /// Play notes with the computer keyboard
        #[arg(long)]
        keyboard: bool,
    },

    /// Pass input events through to an output
    #[command(visible_alias = "t")]
    Thru {
        /// MIDI input device id
        #[arg(long)]
        input: Option<usize>,
        /// MIDI output device id
        #[arg(long)]
        output: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let context = MidiContext::acquire();

    match cli.command {
        Command::List { inputs, outputs } => {
            let filter = if inputs {
                DeviceFilter::InputOnly
            } else if outputs {
                DeviceFilter::OutputOnly
            } else {
                DeviceFilter::Any
            };
            list_devices(&context, filter)
        }
        Command::Play {
            output,
            bpm,
            show_notes,
            file,
        } => run_play(&context, output, &file, bpm, show_notes),
        Command::Show {
            input,
            output,
            keyboard,
        } => run_show(&context, input, output, keyboard),
        Command::Thru { input, output } => run_thru(&context, input, output),
    }
}

fn list_devices(context: &MidiContext, filter: DeviceFilter) -> Result<()> {
    let devices = context
        .list_devices(filter)
        .context("failed to enumerate MIDI devices")?;
    if devices.is_empty() {
        println!("No MIDI devices found.");
    }
    for device in devices {
        let direction = match (device.supports_input, device.supports_output) {
            (true, true) => "in/out",
            (true, false) => "in",
            (false, true) => "out",
            (false, false) => "-",
        };
        let open = if device.is_open { " (open)" } else { "" };
        println!("* {} {}{}", device, direction, open);
    }
    Ok(())
}

/// Returns `id` when given, otherwise lists the devices of `direction` and
/// asks until a listed id is entered.
fn choose_device(
    context: &MidiContext,
    id: Option<usize>,
    direction: Direction,
) -> Result<DeviceId> {
    let devices = context.list_devices(direction.into())?;
    if let Some(id) = id {
        let id = DeviceId(id);
        if !devices.iter().any(|d| d.id == id) {
            bail!("{} is not a MIDI {} device id", id, direction);
        }
        return Ok(id);
    }

    println!("Available MIDI {} devices", direction);
    for device in &devices {
        println!("* {}", device);
    }
    if devices.is_empty() {
        bail!("no MIDI {} devices available", direction);
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Select {} device id: ", direction);
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            bail!("no device selected");
        };
        let line = line?;
        match line.trim().parse::<usize>() {
            Ok(id) if devices.iter().any(|d| d.id == DeviceId(id)) => return Ok(DeviceId(id)),
            Ok(id) => println!("{} is not in the list of device ids.", id),
            Err(_) => println!("\"{}\" is not a valid number.", line.trim()),
        }
    }
}

fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;
    Ok(running)
}

fn release_all_channels(session: &Session) {
    if let Ok(output) = session.output() {
        for channel in 0..16 {
            if let Err(e) = output.all_notes_off(channel) {
                warn!("failed to release notes on channel {}: {}", channel, e);
                break;
            }
        }
    }
}

fn run_play(
    context: &MidiContext,
    output: Option<usize>,
    file: &Path,
    bpm: u32,
    show_notes: bool,
) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let smf = midly::Smf::parse(&bytes)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let toggles = play::schedule(&smf)?;
    if show_notes {
        play::print_schedule(&toggles);
    }

    let output = choose_device(context, output, Direction::Output)?;
    print!("Initializing MIDI interface... ");
    io::stdout().flush()?;
    let session = Session::open(context, None, Some(output), None)
        .context("failed to open MIDI output")?;
    println!("Done");

    let player = session.player().context("session has no output")?;
    let running = install_ctrlc()?;
    info!("playing {} note events at {} bpm", toggles.len(), bpm);
    let result = play::play(&player, &toggles, bpm, &running);
    release_all_channels(&session);
    result
}

fn run_thru(context: &MidiContext, input: Option<usize>, output: Option<usize>) -> Result<()> {
    let input = choose_device(context, input, Direction::Input)?;
    println!();
    let output = choose_device(context, output, Direction::Output)?;

    print!("Initializing MIDI interface... ");
    io::stdout().flush()?;
    let session = Session::open(context, Some(input), Some(output), None)
        .context("failed to open MIDI devices")?;
    println!("Done");

    let player = session.player().context("session has no output")?;
    session.set_callback(Some(callback(move |event| {
        println!("{}", event);
        if event.is_note_on() || event.is_note_off() {
            player.play_note(
                event.data1(),
                event.data2(),
                event.channel(),
                None,
                event.is_note_off(),
            )?;
        }
        Ok(())
    })));

    let running = install_ctrlc()?;
    let reports = session.poller_events();
    while running.load(Ordering::SeqCst) {
        match reports.recv_timeout(Duration::from_millis(100)) {
            Ok(PollerEvent::Stopped { error }) => {
                if let Some(e) = error {
                    eprintln!("MIDI input stopped: {}", e);
                }
                break;
            }
            Ok(report) => eprintln!("{}", report),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    release_all_channels(&session);
    Ok(())
}

fn run_show(
    context: &MidiContext,
    input: Option<usize>,
    output: Option<usize>,
    keyboard: bool,
) -> Result<()> {
    // The computer keyboard can stand in for an input device.
    let input = match (input, keyboard) {
        (None, true) => None,
        (input, _) => Some(choose_device(context, input, Direction::Input)?),
    };
    let output = output
        .map(|id| choose_device(context, Some(id), Direction::Output))
        .transpose()?;

    let session = Session::open(context, input, output, None).context("failed to open MIDI devices")?;

    let (event_tx, event_rx) = channel::unbounded();
    let player = session.player();
    let cb = callback(move |event| {
        event_tx.send(*event)?;
        if let Some(player) = &player {
            if event.is_note_on() || event.is_note_off() {
                player.play_note(event.data1(), event.data2(), event.channel(), None, event.is_note_off())?;
            }
        }
        Ok(())
    });
    session.set_callback(Some(cb.clone()));

    // Setup terminal
    let release_events = keyboard && matches!(supports_keyboard_enhancement(), Ok(true));
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    if release_events {
        execute!(
            stdout,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        )?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(
        Some(cb),
        event_rx,
        session.poller_events(),
        keyboard,
        release_events,
    );
    app.devices = describe_devices(&session);

    let result = run_app(&mut terminal, &mut app);
    app.release_all();

    // Restore terminal
    if release_events {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)?;
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    session.close();
    result.context("terminal error")
}

fn describe_devices(session: &Session) -> String {
    let name = |id: Option<DeviceId>| match id {
        Some(id) => session
            .context()
            .device(id)
            .map(|d| d.name)
            .unwrap_or_else(|_| id.to_string()),
        None => "-".to_string(),
    };
    format!(
        "(in: {}, out: {})",
        name(session.input_device()),
        name(session.output_device())
    )
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        // Process any pending MIDI events
        app.process_events();

        // Draw UI
        terminal.draw(|f| ui::render(f, app))?;

        // Handle keyboard input with timeout
        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key);
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
