//! UI rendering for the dashboard.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem, Wrap},
    style::{Color, Style, Modifier},
};
use crate::cpu::execute::{CONTROL_STORE_SIZE, STAGING_IDLE};
use crate::cpu::memory::{is_device_address, MEMORY_SIZE};
use crate::cpu::registers::REGISTER_NAMES;
use crate::cpu::serial::{ENABLE, READY, RX_WAITING};
use crate::{RunState, Snapshot};
use super::app::{DashboardApp, Pane, MEMORY_ROW};

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DashboardApp) {
    let snap = app.machine.snapshot();

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: registers, microcode and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(21),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_registers(frame, left_chunks[0], &snap);
    draw_microcode(frame, left_chunks[1], app, &snap);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, symbols, serial and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(5),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_symbols(frame, right_chunks[1], app);
    draw_serial(frame, right_chunks[2], app);
    draw_help(frame, right_chunks[3], app);
}

fn pane_block(title: &str, color: Color, focused: bool) -> Block<'_> {
    let border = if focused { Color::Yellow } else { color };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
}

/// Draw registers, latches and flags.
fn draw_registers(frame: &mut Frame, area: Rect, snap: &Snapshot) {
    let mut content: Vec<Line> = REGISTER_NAMES
        .iter()
        .zip(snap.registers.iter())
        .map(|(name, &value)| {
            let style = if value == 0 {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(vec![
                Span::raw(format!("{:>6}: ", name)),
                Span::styled(format!("{:016b}", value), style),
                Span::raw(format!(" {:04X} {:6}", value, value as i16)),
            ])
        })
        .collect();

    content.push(Line::from(vec![
        Span::raw("   MAR: "),
        Span::styled(format!("{:4}", snap.mar), Style::default().fg(Color::White)),
        Span::raw("   MBR: "),
        Span::styled(format!("{:04X}", snap.mbr), Style::default().fg(Color::White)),
        Span::raw("   bus: "),
        Span::styled(staging(snap), Style::default().fg(Color::Magenta)),
    ]));
    content.push(Line::from(vec![
        Span::raw("   MPC: "),
        Span::styled(format!("{:03}", snap.mpc), Style::default().fg(Color::Yellow)),
        Span::raw("   Cycles: "),
        Span::styled(format!("{}", snap.cycles), Style::default().fg(Color::Cyan)),
        Span::raw("   N: "),
        Span::styled(flag(snap.negative), flag_style(snap.negative)),
        Span::raw(" Z: "),
        Span::styled(flag(snap.zero), flag_style(snap.zero)),
        Span::raw("   State: "),
        Span::styled(
            format!("{:?}", snap.state),
            if snap.state == RunState::Run {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Red)
            },
        ),
    ]));
    content.push(Line::from(vec![
        Span::raw("    RX: "),
        Span::raw(serial_status(snap.rx_status)),
        Span::raw("   TX: "),
        Span::raw(serial_status(snap.tx_status)),
    ]));

    let paragraph = Paragraph::new(content)
        .block(pane_block(" Registers ", Color::Green, false));

    frame.render_widget(paragraph, area);
}

fn staging(snap: &Snapshot) -> String {
    if snap.mars == STAGING_IDLE {
        "idle".into()
    } else {
        format!("[{}] {:04X}", snap.mars, snap.mbrs)
    }
}

fn flag(set: bool) -> &'static str {
    if set { "1" } else { "0" }
}

fn flag_style(set: bool) -> Style {
    if set {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn serial_status(status: u16) -> String {
    match status {
        0 => "off".into(),
        ENABLE => "enabled".into(),
        RX_WAITING => "waiting".into(),
        READY => "ready".into(),
        other => other.to_string(),
    }
}

/// Draw the control store around the cursor.
fn draw_microcode(frame: &mut Frame, area: Rect, app: &DashboardApp, snap: &Snapshot) {
    let visible = (area.height as usize).saturating_sub(2);
    let start = app
        .mc_cursor
        .saturating_sub(visible / 2)
        .min(CONTROL_STORE_SIZE.saturating_sub(visible));
    let end = (start + visible).min(CONTROL_STORE_SIZE);
    let focused = app.focus == Pane::Microcode;

    let items: Vec<ListItem> = (start..end)
        .map(|addr| {
            let is_current = addr == usize::from(snap.mpc);
            let (text, bp) = match &app.slots[addr] {
                Some((text, bp)) => (text.as_str(), *bp),
                None => ("", false),
            };
            let prefix = if is_current { "▶" } else { " " };
            let marker = if bp { "●" } else { " " };

            let mut style = if is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if bp {
                Style::default().fg(Color::Red)
            } else if app.slots[addr].is_none() {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            if focused && addr == app.mc_cursor {
                style = style.add_modifier(Modifier::REVERSED);
            }

            ListItem::new(format!("{}{} {:03}: {}", marker, prefix, addr, text)).style(style)
        })
        .collect();

    let list = List::new(items).block(pane_block(" Microcode ", Color::Cyan, focused));

    frame.render_widget(list, area);
}

/// Draw memory rows.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DashboardApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let words = app
        .machine
        .read_memory(app.mem_addr, (visible_rows * MEMORY_ROW).min(MEMORY_SIZE - app.mem_addr));

    let items: Vec<ListItem> = words
        .chunks(MEMORY_ROW)
        .map(|row| {
            let base = row.first().map(|&(addr, _)| addr).unwrap_or(0);
            let cells: Vec<String> = row
                .iter()
                .map(|&(_, value)| {
                    if app.mem_hex {
                        format!("{:04X}", value)
                    } else {
                        format!("{:6}", value as i16)
                    }
                })
                .collect();
            // the last row holds the serial registers
            let style = if row.iter().any(|&(addr, _)| is_device_address(addr as u16)) {
                Style::default().fg(Color::LightMagenta)
            } else if row.iter().all(|&(_, value)| value == 0) {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(format!("{:04}: {}", base, cells.join(" "))).style(style)
        })
        .collect();

    let title = if app.mem_hex { " Memory (hex) " } else { " Memory (dec) " };
    let list = List::new(items)
        .block(pane_block(title, Color::Magenta, app.focus == Pane::Memory));

    frame.render_widget(list, area);
}

/// Draw the symbol table.
fn draw_symbols(frame: &mut Frame, area: Rect, app: &DashboardApp) {
    let symbols = app.machine.symbols();
    let visible = (area.height as usize).saturating_sub(2);
    let start = app.sym_cursor.saturating_sub(visible.saturating_sub(1));
    let focused = app.focus == Pane::Symbols;

    let items: Vec<ListItem> = symbols
        .iter()
        .enumerate()
        .skip(start)
        .take(visible)
        .map(|(i, sym)| {
            let style = if focused && i == app.sym_cursor {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(format!("{:<20} {:4}", sym.name, sym.address)).style(style)
        })
        .collect();

    let list = List::new(items).block(pane_block(" Symbols ", Color::Blue, focused));

    frame.render_widget(list, area);
}

/// Draw the tail of the serial transcript.
fn draw_serial(frame: &mut Frame, area: Rect, app: &DashboardApp) {
    let visible = (area.height as usize).saturating_sub(2);
    let lines: Vec<&str> = app.output.split('\n').collect();
    let tail = lines[lines.len().saturating_sub(visible)..].join("\n");

    let title = if app.input_mode { " Serial [input] " } else { " Serial " };
    let paragraph = Paragraph::new(tail)
        .wrap(Wrap { trim: false })
        .block(pane_block(title, Color::White, app.input_mode));

    frame.render_widget(paragraph, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DashboardApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect, app: &DashboardApp) {
    let lines = if app.input_mode {
        vec![Line::from("Typing feeds the serial receiver"), Line::from("Esc: leave input mode")]
    } else {
        vec![
            Line::from("s: Step  r: Run  h: Halt  l: Reset  b: Breakpoint"),
            Line::from("Tab: Pane  j/k: Scroll  m: Hex  g: Goto symbol"),
            Line::from("i: Serial input  q: Quit"),
        ]
    };
    let help = Paragraph::new(lines)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default()
            .title(" Help ")
            .borders(Borders::ALL));

    frame.render_widget(help, area);
}
