//! Terminal front end for the review session.
//!
//! Rendering reads a [`ReviewState`]; key presses and background results become
//! [`ReviewEvent`]s fed through [`transition`]. Fetching and publishing run in
//! spawned tasks and report back over a channel.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::{debug, info};
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, TableState, Wrap},
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::lib::config::ApplyConfig;
use crate::lib::error::Result;
use crate::lib::model::Window;
use crate::lib::orchestrator::{CancelSignal, FetchOrchestrator, FetchUnit};
use crate::lib::prometheus::MetricsSource;
use crate::lib::publish::PublishPipeline;
use crate::lib::quantity::display_quantity;
use crate::lib::recommender::{Recommendation, RecommendationStatus};
use crate::lib::review::{ApplyMode, Review, ReviewEvent, ReviewState, transition};

const TICK: Duration = Duration::from_millis(100);

/// Run the interactive review until the operator quits. Returns the final state.
pub async fn run_review<S>(
    orchestrator: Arc<FetchOrchestrator<S>>,
    units: Vec<FetchUnit>,
    window: Window,
    cancel: CancelSignal,
    apply: ApplyConfig,
    pipeline: PublishPipeline,
) -> Result<ReviewState>
where
    S: MetricsSource + 'static,
{
    let (tx, rx) = unbounded_channel();
    spawn_fetch(orchestrator, units, window, cancel.clone(), tx.clone());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, rx, tx, &cancel, &apply, &pipeline).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

fn spawn_fetch<S>(
    orchestrator: Arc<FetchOrchestrator<S>>,
    units: Vec<FetchUnit>,
    window: Window,
    cancel: CancelSignal,
    tx: UnboundedSender<ReviewEvent>,
) where
    S: MetricsSource + 'static,
{
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let result = orchestrator
            .run(units, &window, &cancel, |p| {
                let _ = progress_tx.send(ReviewEvent::Progress(p));
            })
            .await;
        let event = match result {
            Ok(report) => ReviewEvent::Loaded(report.recommendations),
            Err(e) => ReviewEvent::LoadFailed(e.to_string()),
        };
        let _ = tx.send(event);
    });
}

fn spawn_publish(
    review: &Review,
    mode: ApplyMode,
    apply: &ApplyConfig,
    pipeline: &PublishPipeline,
    tx: UnboundedSender<ReviewEvent>,
) {
    let recommendations = review.recommendations.clone();
    let selection = review.selection.clone();
    let apply = apply.clone();
    let pipeline = pipeline.clone();

    tokio::spawn(async move {
        let step_tx = tx.clone();
        let result = pipeline
            .apply_selection(&recommendations, &selection, &apply, mode, |step| {
                let _ = step_tx.send(ReviewEvent::PublishProgress(step));
            })
            .await;
        let event = match result {
            Ok(summary) => ReviewEvent::Published(summary),
            Err(e) => ReviewEvent::PublishFailed(e.to_string()),
        };
        let _ = tx.send(event);
    });
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut rx: UnboundedReceiver<ReviewEvent>,
    tx: UnboundedSender<ReviewEvent>,
    cancel: &CancelSignal,
    apply: &ApplyConfig,
    pipeline: &PublishPipeline,
) -> Result<ReviewState> {
    let mut state = ReviewState::new();

    loop {
        terminal.draw(|f| draw(f, &state))?;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if matches!(state, ReviewState::Done { .. }) {
                        return Ok(state);
                    }
                    events.extend(key_to_event(&state, key));
                }
            }
        } else {
            // Let background tasks make progress between polls
            tokio::task::yield_now().await;
        }

        for event in events {
            let was_publishing = matches!(state, ReviewState::Publishing { .. });
            let is_cancel = event == ReviewEvent::Cancel;
            let is_loaded = matches!(event, ReviewEvent::Loaded(_));

            state = transition(state, event);

            if is_cancel && matches!(state, ReviewState::Cancelled { .. }) {
                cancel.cancel();
                info!("Review cancelled");
                return Ok(state);
            }
            if is_loaded {
                state = transition(state, ReviewEvent::Begin(apply.mode));
            }
            if let ReviewState::Publishing { review, mode, .. } = &state {
                if !was_publishing {
                    debug!("Publishing {} selected changes", review.selection.len());
                    spawn_publish(review, *mode, apply, pipeline, tx.clone());
                }
            }
        }
    }
}

/// Map a key press to a review event for the current state
pub fn key_to_event(state: &ReviewState, key: KeyEvent) -> Option<ReviewEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(ReviewEvent::Cancel);
    }

    match state {
        ReviewState::Reviewing(_) => match key.code {
            KeyCode::Up | KeyCode::Char('k') => Some(ReviewEvent::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(ReviewEvent::Down),
            KeyCode::Char(' ') => Some(ReviewEvent::Toggle),
            KeyCode::Char('a') => Some(ReviewEvent::SelectAll),
            KeyCode::Char('c') => Some(ReviewEvent::ClearSelection),
            KeyCode::Enter => Some(ReviewEvent::Confirm),
            KeyCode::Char('q') | KeyCode::Esc => Some(ReviewEvent::Cancel),
            _ => None,
        },
        ReviewState::Confirming { .. } => match key.code {
            KeyCode::Char('m') | KeyCode::Tab => Some(ReviewEvent::ToggleMode),
            KeyCode::Enter | KeyCode::Char('y') => Some(ReviewEvent::Publish),
            KeyCode::Esc | KeyCode::Char('n') => Some(ReviewEvent::Back),
            KeyCode::Char('q') => Some(ReviewEvent::Cancel),
            _ => None,
        },
        ReviewState::Failed { .. } => match key.code {
            KeyCode::Char('r') => Some(ReviewEvent::Retry),
            KeyCode::Char('b') | KeyCode::Esc => Some(ReviewEvent::Back),
            KeyCode::Char('q') => Some(ReviewEvent::Cancel),
            _ => None,
        },
        ReviewState::Loading { .. } | ReviewState::Loaded { .. } => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(ReviewEvent::Cancel),
            _ => None,
        },
        ReviewState::Publishing { .. }
        | ReviewState::Done { .. }
        | ReviewState::Cancelled { .. } => None,
    }
}

fn draw(f: &mut Frame, state: &ReviewState) {
    let area = f.area();

    match state {
        ReviewState::Loading { progress } => {
            let ratio = if progress.total == 0 {
                0.0
            } else {
                progress.completed as f64 / progress.total as f64
            };
            let gauge = Gauge::default()
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(" Fetching metrics (Press 'q' to cancel) "),
                )
                .gauge_style(Style::default().fg(Color::Yellow))
                .label(format!("{}/{}", progress.completed, progress.total))
                .ratio(ratio.clamp(0.0, 1.0));
            f.render_widget(gauge, centered(area, 60, 3));
        }
        ReviewState::Loaded { .. } => {}
        ReviewState::Reviewing(review) => {
            let footer = "↑/k ↓/j move · space toggle · a select all ok · c clear · enter apply · q quit";
            draw_review(f, review, footer, Color::Gray);
        }
        ReviewState::Confirming { review, mode } => {
            draw_review(f, review, "", Color::Gray);
            let text = format!(
                "Apply {} selected change(s) and {}?\n\nm switch mode · enter confirm · esc back",
                review.selection.len(),
                mode.label()
            );
            draw_popup(f, " Confirm ", &text, Color::Yellow);
        }
        ReviewState::Publishing { review, step, .. } => {
            draw_review(f, review, "", Color::Gray);
            draw_popup(f, " Publishing ", &format!("{}…", step.label()), Color::Cyan);
        }
        ReviewState::Failed { review, reason, .. } => {
            let footer = format!("Failed: {} · r retry · b back · q quit", reason);
            draw_review(f, review, &footer, Color::Red);
        }
        ReviewState::Done { summary, .. } => {
            draw_popup(
                f,
                " Done ",
                &format!("{}\n\nPress any key to exit", summary),
                Color::Green,
            );
        }
        ReviewState::Cancelled { .. } => {}
    }
}

fn draw_review(f: &mut Frame, review: &Review, footer: &str, footer_color: Color) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(f.area());

    let header_cells = ["", "Target", "Resource", "Request", "Limit", "p95", "Status"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = review
        .recommendations
        .iter()
        .map(|r| recommendation_row(r, review.selection.contains(r)));

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Percentage(30),
            Constraint::Length(8),
            Constraint::Percentage(18),
            Constraint::Percentage(18),
            Constraint::Length(9),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Recommendations ({} selected) ",
        review.selection.len()
    )))
    .row_highlight_style(Style::default().bg(Color::DarkGray))
    .highlight_symbol(">> ");

    let mut table_state = TableState::default();
    table_state.select(Some(review.cursor));
    f.render_stateful_widget(table, chunks[0], &mut table_state);

    let detail = review
        .current()
        .map(|r| r.reason.as_str())
        .unwrap_or_default();
    let footer = Paragraph::new(format!("{}\n{}", detail, footer))
        .style(Style::default().fg(footer_color))
        .wrap(Wrap { trim: true });
    f.render_widget(footer, chunks[1]);
}

fn recommendation_row(r: &Recommendation, selected: bool) -> Row<'static> {
    let kind = r.resource;
    let change = |current: Option<f64>, new: Option<f64>| match new {
        Some(_) => format!(
            "{} → {}",
            display_quantity(kind, current),
            display_quantity(kind, new)
        ),
        None => display_quantity(kind, current),
    };

    let mut status = r.status.label().to_string();
    if r.capped {
        status.push_str(" (capped)");
    }
    if r.caution {
        status.push_str(" (few samples)");
    }

    let style = match r.status {
        RecommendationStatus::Ok => Style::default(),
        RecommendationStatus::InsufficientData => Style::default().fg(Color::DarkGray),
        RecommendationStatus::Error(_) => Style::default().fg(Color::Red),
    };

    Row::new(vec![
        Cell::from(if selected { "[x]" } else { "[ ]" }),
        Cell::from(r.target.to_string()),
        Cell::from(kind.to_string()),
        Cell::from(change(r.current.request, r.final_request)),
        Cell::from(change(r.current.limit, r.final_limit)),
        Cell::from(
            r.observed_p95
                .map(|p| display_quantity(kind, Some(p)))
                .unwrap_or_else(|| "-".into()),
        ),
        Cell::from(status),
    ])
    .style(style)
    .height(1)
}

fn draw_popup(f: &mut Frame, title: &str, text: &str, color: Color) {
    let area = centered(f.area(), 70, 7);
    f.render_widget(Clear, area);
    let popup = Paragraph::new(text.to_string())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title.to_string())
                .border_style(Style::default().fg(color)),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(popup, area);
}

/// `width` percent wide, `height` rows tall, centred in `area`
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let height = height.min(area.height);
    let w = area.width * width / 100;
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - height) / 2,
        width: w,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::model::{CurrentSpec, ResourceKind, SampleSeries, WorkloadKind, WorkloadTarget};
    use crate::lib::orchestrator::Progress;
    use crate::lib::recommender::{RecommendationPolicy, recommend};
    use crate::lib::stats::UsageStats;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn reviewing() -> ReviewState {
        let rec = recommend(
            &RecommendationPolicy::default(),
            WorkloadTarget::new("shop", "api", "app"),
            WorkloadKind::Deployment,
            ResourceKind::Memory,
            CurrentSpec::default(),
            UsageStats::from_series(&SampleSeries::from_values(&[1e8, 2e8])),
        );
        ReviewState::Reviewing(Review::new(vec![rec], ApplyMode::PullRequest))
    }

    fn screen(state: &ReviewState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 20)).unwrap();
        terminal.draw(|f| draw(f, state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn maps_keys_per_state() {
        let state = reviewing();
        assert_eq!(key_to_event(&state, key(KeyCode::Char(' '))), Some(ReviewEvent::Toggle));
        assert_eq!(key_to_event(&state, key(KeyCode::Enter)), Some(ReviewEvent::Confirm));
        assert_eq!(key_to_event(&state, key(KeyCode::Char('j'))), Some(ReviewEvent::Down));

        let publishing = transition(
            transition(transition(state, ReviewEvent::SelectAll), ReviewEvent::Confirm),
            ReviewEvent::Publish,
        );
        assert_eq!(key_to_event(&publishing, key(KeyCode::Char('q'))), None);
        assert_eq!(
            key_to_event(
                &publishing,
                KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
            ),
            Some(ReviewEvent::Cancel)
        );
    }

    #[test]
    fn renders_loading_progress() {
        let text = screen(&ReviewState::Loading {
            progress: Progress {
                completed: 3,
                total: 12,
            },
        });
        assert!(text.contains("Fetching metrics"));
        assert!(text.contains("3/12"));
    }

    #[test]
    fn renders_recommendation_rows() {
        let state = transition(reviewing(), ReviewEvent::Toggle);
        let text = screen(&state);
        assert!(text.contains("shop/api/app"));
        assert!(text.contains("[x]"));
        assert!(text.contains("1 selected"));
    }
}
