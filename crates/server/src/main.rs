mod events;
mod server;
mod tui;

use std::io;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use server::EchoServer;
use tickline::TransportConfig;
use tickline::config::{DEFAULT_CONNECT_KEY, DEFAULT_PORT};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "tickline-server")]
#[command(about = "Tickline echo server")]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 64)]
    max_clients: usize,

    #[arg(short, long, default_value = DEFAULT_CONNECT_KEY)]
    key: String,

    #[arg(long, help = "Listen on IPv6")]
    ipv6: bool,

    #[arg(long, default_value_t = 5000, help = "Disconnect timeout in ms")]
    timeout_ms: u64,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = TransportConfig {
        port: args.port,
        ipv6_enabled: args.ipv6,
        max_connections: args.max_clients,
        disconnect_timeout: Duration::from_millis(args.timeout_ms),
        connect_key: args.key,
        ..Default::default()
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut server = EchoServer::new(config, args.tick_rate)?;

    if args.headless {
        log::info!("{}", server.description());
        server.run();
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_with_tui(server: &mut EchoServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new("Tickline Server".to_string());
    tui_state.log_info(server.description());

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            if event.is_error() {
                tui_state.log_error(event.describe());
            } else {
                tui_state.log_info(event.describe());
            }
        }

        if let Some(connection) = tui_state.take_pending_kick() {
            tui_state.log_info(format!("Kicking client {}", connection));
            server.kick_client(connection);
        }

        let clients = server.client_infos();
        tui_state.sync_selection(clients.len());

        if event::poll(server.tick_duration())? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(clients.len()),
                        KeyCode::Down => tui_state.select_next(clients.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => tui_state.request_kick(&clients),
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    server.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
