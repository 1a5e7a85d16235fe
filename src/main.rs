use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

use grind::session::{GrindState, GrindTracker, PowerLevelSummary};
use grind::sm2::Quality;
use grind::store::{CsvStore, SessionStore};
use grind::{card, review};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "drill" => {
            if args.len() < 3 {
                eprintln!("Usage: grind drill <paths...>");
                std::process::exit(1);
            }
            drill(&args[2..]);
        }
        "start" => {
            let (positional, opts) = parse_tracker_args(&args[2..]);
            let Some(subject) = positional.first() else {
                eprintln!("Usage: grind start <subject> [--dir DIR] [--user USER]");
                std::process::exit(1);
            };
            block_on(start(subject, &opts));
        }
        "stop" => {
            let (_, opts) = parse_tracker_args(&args[2..]);
            block_on(stop(&opts));
        }
        "status" => {
            let (_, opts) = parse_tracker_args(&args[2..]);
            block_on(status(&opts));
        }
        "log" => {
            let (_, opts) = parse_tracker_args(&args[2..]);
            block_on(log(&opts));
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: grind <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  drill <paths...>                 Review due cards in the terminal");
    eprintln!("  start <subject> [--dir D]        Start a timed study session");
    eprintln!("  stop [--dir D]                   Stop the active session");
    eprintln!("  status [--dir D] [--json]        Show session state and power level");
    eprintln!("  log [--dir D]                    List recorded sessions");
    eprintln!("Session commands also accept --user USER (default: local).");
}

fn block_on<F: Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new().unwrap().block_on(fut)
}

// -- Session tracker commands --

struct TrackerOpts {
    dir: String,
    user: String,
    json: bool,
}

fn parse_tracker_args(args: &[String]) -> (Vec<String>, TrackerOpts) {
    let mut positional = Vec::new();
    let mut opts = TrackerOpts {
        dir: "grind-data".to_string(),
        user: "local".to_string(),
        json: false,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" if i + 1 < args.len() => {
                opts.dir = args[i + 1].clone();
                i += 2;
            }
            "--user" if i + 1 < args.len() => {
                opts.user = args[i + 1].clone();
                i += 2;
            }
            "--json" => {
                opts.json = true;
                i += 1;
            }
            _ => {
                positional.push(args[i].clone());
                i += 1;
            }
        }
    }
    (positional, opts)
}

fn open_store(opts: &TrackerOpts) -> CsvStore {
    CsvStore::open(&opts.dir).unwrap_or_else(|e| {
        eprintln!("Cannot open data directory {}: {e}", opts.dir);
        std::process::exit(1);
    })
}

/// Build a tracker reconciled with the store: recover or auto-close any
/// remote active session, then load the recorded session list.
async fn load_tracker<'a>(store: &'a CsvStore, opts: &TrackerOpts) -> GrindTracker<&'a CsvStore> {
    let now = Utc::now();
    let mut tracker = GrindTracker::new(opts.user.as_str(), store);
    tracker.sync_active_session(now).await;
    match store.load_study_sessions(&opts.user).await {
        Ok(sessions) => tracker.load_sessions(sessions),
        Err(e) => eprintln!("Warning: could not load session history: {e}"),
    }
    tracker
}

async fn start(subject: &str, opts: &TrackerOpts) {
    let store = open_store(opts);
    let mut tracker = load_tracker(&store, opts).await;

    let previous = match tracker.state() {
        GrindState::Grinding { subject, .. } => Some(subject.clone()),
        GrindState::Idle => None,
    };
    tracker.start_grind(subject, Utc::now()).await;

    if let Some(previous) = previous {
        println!("Closed the open session on {previous}.");
    }
    println!("Grinding {subject}. Run `grind stop` when you're done.");
}

async fn stop(opts: &TrackerOpts) {
    let store = open_store(opts);
    let mut tracker = load_tracker(&store, opts).await;

    if !tracker.is_grinding() {
        println!("No active session.");
        return;
    }

    tracker.stop_grind(Utc::now()).await;
    if let Some(session) = tracker.sessions().last() {
        println!(
            "Recorded {} min on {}.",
            session.duration_minutes, session.subject_id
        );
    }
    print_power(tracker.power_level());
}

#[derive(serde::Serialize)]
struct Status<'a> {
    state: &'a GrindState,
    elapsed_minutes: i64,
    power: PowerLevelSummary,
}

async fn status(opts: &TrackerOpts) {
    let store = open_store(opts);
    let tracker = load_tracker(&store, opts).await;
    let now = Utc::now();

    if opts.json {
        let status = Status {
            state: tracker.state(),
            elapsed_minutes: tracker.elapsed_minutes(now),
            power: tracker.power_level(),
        };
        println!("{}", serde_json::to_string_pretty(&status).unwrap());
        return;
    }

    match tracker.state() {
        GrindState::Idle => println!("Idle."),
        GrindState::Grinding {
            subject,
            started_at,
        } => {
            println!(
                "Grinding {subject} for {} min (since {}).",
                tracker.elapsed_minutes(now),
                format_time(*started_at),
            );
        }
    }
    print_power(tracker.power_level());
}

async fn log(opts: &TrackerOpts) {
    let store = open_store(opts);
    let sessions = match store.load_study_sessions(&opts.user).await {
        Ok(sessions) => sessions,
        Err(e) => {
            eprintln!("Could not load session history: {e}");
            std::process::exit(1);
        }
    };

    if sessions.is_empty() {
        println!("No sessions recorded.");
        return;
    }
    for s in &sessions {
        println!(
            "{}  {:>4} min  {}",
            format_time(s.started_at),
            s.duration_minutes,
            s.subject_id
        );
    }
}

fn print_power(power: PowerLevelSummary) {
    println!(
        "Power level: {} ({} min total)",
        power.score, power.total_minutes
    );
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

// -- Drill --

fn drill(args: &[String]) {
    let files = card::discover_files(args);
    if files.is_empty() {
        eprintln!("No CSV files found.");
        std::process::exit(1);
    }

    // Load all cards, tracking source file per card
    let mut all_cards: Vec<card::Card> = Vec::new();
    let mut card_source: Vec<PathBuf> = Vec::new();

    for file in &files {
        match card::load_csv(file) {
            Ok(cards) => {
                for c in cards {
                    card_source.push(file.clone());
                    all_cards.push(c);
                }
            }
            Err(e) => {
                eprintln!("Warning: {e}");
            }
        }
    }

    if all_cards.is_empty() {
        eprintln!("No cards found.");
        std::process::exit(1);
    }

    let now = Utc::now();

    // Show deck summaries
    let summaries = review::deck_summaries(&all_cards, now);
    println!("Decks:");
    for (i, s) in summaries.iter().enumerate() {
        println!(
            "  {}: {} ({} due / {} total)",
            i + 1,
            s.name,
            s.due,
            s.total
        );
    }
    println!("  0: All decks");
    println!();

    // Prompt for selection
    let selected_decks = prompt_deck_selection(&summaries);

    // Filter to due cards in selected decks
    let due_indices = review::filter_due(&all_cards, now);
    let due_in_selected: Vec<usize> = due_indices
        .into_iter()
        .filter(|&i| selected_decks.is_empty() || selected_decks.contains(&all_cards[i].deck))
        .collect();

    if due_in_selected.is_empty() {
        println!("No cards due for review.");
        return;
    }

    println!("{} cards due for review.\n", due_in_selected.len());

    // Build review items and shuffle
    let mut items = review::build_review_items(&all_cards, &due_in_selected);
    shuffle(&mut items);

    // Drill loop
    let mut counts = [0u32; 6];
    let stdin = io::stdin();
    let mut stdin = stdin.lock();

    for (i, item) in items.iter().enumerate() {
        println!("[{}/{}] {}", i + 1, items.len(), item.deck);
        println!();
        println!("{}", item.front_display);
        println!();

        // Wait for Enter to reveal
        print!("Press Enter to reveal...");
        io::stdout().flush().unwrap();
        let mut buf = String::new();
        stdin.read_line(&mut buf).unwrap();

        println!("{}", item.reveal_display);
        println!();

        // Get rating
        let quality = loop {
            print!("Rate recall (0=blackout ... 5=perfect): ");
            io::stdout().flush().unwrap();
            buf.clear();
            stdin.read_line(&mut buf).unwrap();
            if let Ok(n) = buf.trim().parse::<u8>()
                && let Some(q) = Quality::from_u8(n)
            {
                break q;
            }
            println!("Please enter a number from 0 to 5.");
        };
        counts[quality as usize] += 1;

        review::apply_grade(&mut all_cards[item.card_index], quality, now);
        println!();
    }

    // Save all cards back to their source files
    let mut files_to_save: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for (i, source) in card_source.iter().enumerate() {
        files_to_save.entry(source.clone()).or_default().push(i);
    }

    for (path, indices) in &files_to_save {
        let file_cards: Vec<card::Card> = indices.iter().map(|&i| all_cards[i].clone()).collect();
        if let Err(e) = card::save_csv(path, &file_cards) {
            eprintln!("Error saving {}: {e}", path.display());
        }
    }

    // Drill summary
    let passed: u32 = counts[3..].iter().sum();
    let total: u32 = counts.iter().sum();
    println!("Drill complete!");
    println!("  Recalled {passed} of {total} cards (grades: {counts:?})");
}

fn prompt_deck_selection(summaries: &[review::DeckSummary]) -> Vec<String> {
    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    loop {
        print!("Select deck(s) (comma-separated numbers, or 0 for all): ");
        io::stdout().flush().unwrap();
        let mut buf = String::new();
        stdin.read_line(&mut buf).unwrap();

        let mut selected = Vec::new();
        let mut valid = true;

        for part in buf.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<usize>() {
                Ok(0) => return Vec::new(), // all decks
                Ok(n) if n >= 1 && n <= summaries.len() => {
                    selected.push(summaries[n - 1].name.clone());
                }
                _ => {
                    valid = false;
                    break;
                }
            }
        }

        if valid && !selected.is_empty() {
            return selected;
        }
        println!("Invalid selection. Try again.");
    }
}

fn shuffle<T>(items: &mut [T]) {
    // Simple Fisher-Yates using a basic seeded RNG (xorshift64)
    let mut state: u64 = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    if state == 0 {
        state = 1;
    }

    for i in (1..items.len()).rev() {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        items.swap(i, j);
    }
}
