use crash_game::{
    controller::AppSnapshot,
    ledger::{
        FeedEntry,
        LedgerEvent,
    },
    session::{
        MultiplierTier,
        Session,
        SessionStatus,
        format_eth,
        format_multiplier,
        short_address,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ethers::types::U256;
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;

const BALANCE_DECIMALS: u32 = 4;
/// The gauge fills completely at 5.00x.
const GAUGE_FULL_MULTIPLIER: u64 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Connect,
    Start,
    Withdraw,
    Reset,
    Redraw,
}

pub type InputEventReceiver = EventStream;

#[derive(Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    QuitModal,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    // one persistent Terminal keeps buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(input: &mut InputEventReceiver) -> Result<Event> {
    match input.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

/// Maps a terminal event to a user action, tracking the quit prompt.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if state.mode == Mode::QuitModal {
        return match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('c') => Some(UserEvent::Connect),
        KeyCode::Char('s') | KeyCode::Enter => Some(UserEvent::Start),
        KeyCode::Char('w') | KeyCode::Char(' ') => Some(UserEvent::Withdraw),
        KeyCode::Char('r') => Some(UserEvent::Reset),
        _ => None,
    }
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    let mode = state.mode;
    if let Some(term) = state.terminal.as_mut() {
        term.draw(|f| ui(f, mode, snap))?;
    }
    Ok(())
}

fn ui(f: &mut Frame, mode: Mode, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // wallet
            Constraint::Length(9), // multiplier
            Constraint::Min(6),    // activity feed
            Constraint::Length(5), // status/errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_wallet_panel(f, chunks[0], snap);
    draw_multiplier_panel(f, chunks[1], snap);
    draw_feed(f, chunks[2], snap);
    draw_status(f, chunks[3], snap);
    draw_help(f, chunks[4]);
    if mode == Mode::QuitModal {
        draw_quit_modal(f);
    }
}

fn draw_wallet_panel(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let account = match snap.wallet.address {
        Some(address) => short_address(&format!("{address:?}")),
        None => String::from("not connected"),
    };
    let text = format!(
        "Account: {} | Balance: {} ETH | Pool: {} ETH | Stake: {} ETH",
        account,
        format_eth(snap.wallet.balance, BALANCE_DECIMALS),
        format_eth(snap.pool_balance, BALANCE_DECIMALS),
        format_eth(snap.stake, BALANCE_DECIMALS),
    );
    let widget = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_multiplier_panel(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let session = &snap.session;
    let title = if snap.loading { "Crash (pending...)" } else { "Crash" };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);

    let multiplier = Line::from(Span::styled(
        format_multiplier(session.multiplier),
        Style::default()
            .fg(tier_color(MultiplierTier::of(session.multiplier)))
            .add_modifier(Modifier::BOLD),
    ));
    let mut lines = vec![
        multiplier,
        Line::from(Span::styled(
            headline(session),
            Style::default().fg(status_color(session.status)),
        )),
    ];
    if let Some(prompt) = idle_prompt(snap) {
        lines.push(Line::from(Span::styled(prompt, Style::default().fg(Color::Red))));
    }
    if let Some(id) = session.id {
        lines.push(Line::from(format!(
            "Session #{id} | {}",
            game_info(snap.stake, session.multiplier)
        )));
    }
    if let Some(payout) = session.last_payout {
        lines.push(Line::from(format!(
            "Last payout: {} ETH",
            format_eth(payout, BALANCE_DECIMALS)
        )));
    }
    let widget = Paragraph::new(lines).alignment(Alignment::Center);
    f.render_widget(widget, rows[0]);

    let bar_color = if session.status == SessionStatus::Crashed {
        Color::Red
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(bar_color))
        .ratio(gauge_ratio(session.multiplier))
        .label(format_multiplier(session.multiplier));
    f.render_widget(gauge, rows[1]);
}

fn draw_feed(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let items: Vec<ListItem> = if snap.feed.is_empty() {
        vec![ListItem::new("No recent activity")]
    } else {
        snap.feed
            .iter()
            .map(|entry| ListItem::new(describe_entry(entry)))
            .collect()
    };
    let widget =
        List::new(items).block(Block::default().borders(Borders::ALL).title("Activity"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let widget = match &snap.error {
        Some(error) => Paragraph::new(error.clone())
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red)),
        None => {
            let status = if snap.status_line.trim().is_empty() {
                "Ready"
            } else {
                snap.status_line.as_str()
            };
            Paragraph::new(status.to_string())
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title("Status"))
                .style(Style::default().fg(Color::Green))
        }
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "c connect | s/Enter start | w/Space cash out | r reset | q/Esc quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_quit_modal(f: &mut Frame) {
    let area = centered_rect(40, 20, f.area());
    let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
    let p = Paragraph::new("Quit the game? (Y/N)");
    f.render_widget(Clear, area);
    f.render_widget(block.clone(), area);
    f.render_widget(p, block.inner(area));
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn headline(session: &Session) -> String {
    match session.status {
        SessionStatus::Idle => String::from("Ready to play"),
        SessionStatus::Waiting => format!("Starting in {}s...", session.countdown),
        SessionStatus::Playing => String::from("In flight..."),
        SessionStatus::Crashed => String::from("CRASH!"),
        SessionStatus::Won => String::from("Cashed out!"),
    }
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Idle => Color::Gray,
        SessionStatus::Waiting => Color::Blue,
        SessionStatus::Playing | SessionStatus::Won => Color::Green,
        SessionStatus::Crashed => Color::Red,
    }
}

/// Stake times the current multiplier, which is in hundredths.
fn potential_gain(stake: U256, multiplier: u64) -> U256 {
    stake * U256::from(multiplier) / U256::from(100u64)
}

fn game_info(stake: U256, multiplier: u64) -> String {
    format!(
        "Stake: {} ETH | Potential gain: {} ETH",
        format_eth(stake, BALANCE_DECIMALS),
        format_eth(potential_gain(stake, multiplier), BALANCE_DECIMALS)
    )
}

fn gauge_ratio(multiplier: u64) -> f64 {
    multiplier.min(GAUGE_FULL_MULTIPLIER) as f64 / GAUGE_FULL_MULTIPLIER as f64
}

/// Shown before a round when the connected wallet cannot cover the stake.
fn idle_prompt(snap: &AppSnapshot) -> Option<String> {
    let connected = snap.wallet.address.is_some();
    if connected
        && snap.session.status == SessionStatus::Idle
        && snap.wallet.balance < snap.stake
    {
        return Some(format!(
            "Insufficient balance to stake {} ETH",
            format_eth(snap.stake, BALANCE_DECIMALS)
        ));
    }
    None
}

fn tier_color(tier: MultiplierTier) -> Color {
    match tier {
        MultiplierTier::Low => Color::Green,
        MultiplierTier::Medium => Color::Yellow,
        MultiplierTier::High => Color::LightRed,
        MultiplierTier::Extreme => Color::Red,
    }
}

fn describe_entry(entry: &FeedEntry) -> String {
    let body = match &entry.event {
        LedgerEvent::SessionStarted {
            session_id,
            player,
            bet_amount,
        } => format!(
            "#{session_id} {} staked {} ETH",
            short_address(&format!("{player:?}")),
            format_eth(*bet_amount, BALANCE_DECIMALS)
        ),
        LedgerEvent::SessionWithdrawn {
            session_id,
            player,
            multiplier,
            payout,
        } => format!(
            "#{session_id} {} cashed out at {} for {} ETH",
            short_address(&format!("{player:?}")),
            format_multiplier(*multiplier),
            format_eth(*payout, BALANCE_DECIMALS)
        ),
        LedgerEvent::SessionCrashed {
            session_id,
            player,
            crash_point,
        } => format!(
            "#{session_id} {} crashed at {}",
            short_address(&format!("{player:?}")),
            format_multiplier(*crash_point)
        ),
        LedgerEvent::FundsDeposited { player, amount } => format!(
            "{} deposited {} ETH",
            short_address(&format!("{player:?}")),
            format_eth(*amount, BALANCE_DECIMALS)
        ),
    };
    format!("[{}] {}", entry.block, body)
}
