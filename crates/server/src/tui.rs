use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph};

use tickline::ConnectionId;

use crate::server::{ClientInfo, ServerStats};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

pub struct TuiState {
    title: String,
    log: VecDeque<(LogLevel, String)>,
    selected: usize,
    pending_kick: Option<ConnectionId>,
}

impl TuiState {
    pub fn new(title: String) -> Self {
        Self {
            title,
            log: VecDeque::new(),
            selected: 0,
            pending_kick: None,
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    /// Keeps the highlighted row inside the current client list.
    pub fn sync_selection(&mut self, count: usize) {
        self.selected = self.selected.min(count.saturating_sub(1));
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        self.pending_kick = clients.get(self.selected).map(|c| c.connection);
    }

    pub fn take_pending_kick(&mut self) -> Option<ConnectionId> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(clients.len().clamp(1, 8) as u16 + 2),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, stats);
    render_status(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_clients(frame, chunks[3], state, clients);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let title = format!(" {} - Uptime: {} ", state.title, format_duration(stats.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Clients: {}  |  Echoed: {}",
        stats.tick, stats.client_count, stats.messages_echoed
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let max = stats.max_clients.max(1);
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((stats.client_count as f64 / max as f64).min(1.0))
        .label(format!("{}/{} clients", stats.client_count, max));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.packets_sent, net.packets_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Malformed: ", Style::default().fg(Color::Gray)),
            Span::styled(
                net.malformed_received.to_string(),
                Style::default().fg(if net.malformed_received > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let block = Block::default()
        .title(" Connections ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let items: Vec<ListItem> = clients
        .iter()
        .map(|c| ListItem::new(format!("{:>5}  {}", c.connection.to_string(), c.addr)))
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut list_state = ListState::default();
    if !clients.is_empty() {
        list_state.select(Some(state.selected));
    }
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.as_str(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Up/Down select  |  'k' kick  |  'q' or ESC quit")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_wraps() {
        let mut state = TuiState::new("test".to_string());
        state.select_prev(3);
        assert_eq!(state.selected, 2);
        state.select_next(3);
        assert_eq!(state.selected, 0);
        state.select_next(0);
        assert_eq!(state.selected, 0);
    }

    fn clients(ids: &[u32]) -> Vec<ClientInfo> {
        ids.iter()
            .map(|&id| ClientInfo {
                connection: ConnectionId(id),
                addr: format!("127.0.0.1:{}", 5000 + id),
            })
            .collect()
    }

    #[test]
    fn test_selection_clamped_when_list_shrinks() {
        let mut state = TuiState::new("test".to_string());
        state.select_prev(3);
        assert_eq!(state.selected, 2);

        state.sync_selection(2);
        assert_eq!(state.selected, 1);

        state.sync_selection(0);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn test_kick_targets_highlighted_connection() {
        let mut state = TuiState::new("test".to_string());
        let before = clients(&[1, 2, 3]);
        state.select_next(before.len());
        state.request_kick(&before);

        // Client 1 leaves before the kick is applied.
        let after = clients(&[2, 3]);
        state.sync_selection(after.len());

        assert_eq!(state.take_pending_kick(), Some(ConnectionId(2)));
        assert_eq!(state.take_pending_kick(), None);
    }

    #[test]
    fn test_kick_last_row_after_shrink() {
        let mut state = TuiState::new("test".to_string());
        let before = clients(&[1, 2, 3]);
        state.select_prev(before.len());

        let after = clients(&[2, 3]);
        state.sync_selection(after.len());
        state.request_kick(&after);

        assert_eq!(state.selected, 1);
        assert_eq!(state.take_pending_kick(), Some(ConnectionId(3)));
    }

    #[test]
    fn test_kick_with_no_clients() {
        let mut state = TuiState::new("test".to_string());
        state.request_kick(&[]);
        assert_eq!(state.take_pending_kick(), None);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new("test".to_string());
        for i in 0..MAX_LOG_LINES + 5 {
            state.log_info(format!("line {}", i));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(|(_, m)| m.as_str()), Some("line 5"));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
    }
}
