use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use eframe::egui::{self, Align, Color32, Layout, RichText, ScrollArea, TextEdit};

use crate::countdown::model::Countdown;
use crate::countdown::remaining::TimeRemaining;
use crate::countdown::scheduler::TickScheduler;
use crate::store::{ChangeSignal, CountdownStore};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const MAX_TICKS_PER_UPDATE: usize = 8;

pub fn run_gui(
    store: Arc<Mutex<CountdownStore>>,
    signal: Arc<ChangeSignal>,
    data_file: PathBuf,
    api_bind: String,
    api_port: u16,
    api_enabled: bool,
) -> Result<()> {
    let native_options = eframe::NativeOptions {
        vsync: false,
        viewport: egui::ViewportBuilder::default()
            .with_title("Tickdown")
            .with_inner_size([880.0, 680.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    let app = TickdownApp::new(store, signal, data_file, api_bind, api_port, api_enabled)?;

    eframe::run_native(
        "Tickdown",
        native_options,
        Box::new(move |cc| {
            configure_theme(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
    .map_err(|err| anyhow::anyhow!("failed to launch Tickdown GUI: {err}"))?;

    Ok(())
}

fn configure_theme(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::dark();
    visuals.override_text_color = Some(Color32::from_rgb(228, 232, 240));
    visuals.panel_fill = Color32::from_rgb(14, 16, 24);
    visuals.window_fill = Color32::from_rgb(18, 20, 30);
    visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(16, 18, 28);
    visuals.widgets.inactive.bg_fill = Color32::from_rgb(24, 28, 40);
    visuals.widgets.hovered.bg_fill = Color32::from_rgb(38, 46, 66);
    visuals.widgets.active.bg_fill = Color32::from_rgb(52, 64, 92);
    visuals.selection.bg_fill = Color32::from_rgb(66, 126, 186);
    ctx.set_visuals(visuals);
}

const ACCENT: Color32 = Color32::from_rgb(120, 205, 192);
const MUTED: Color32 = Color32::from_rgb(155, 166, 186);
const EXPIRED: Color32 = Color32::from_rgb(255, 118, 118);

type DisplayMap = Rc<RefCell<HashMap<String, TimeRemaining>>>;

struct TickdownApp {
    store: Arc<Mutex<CountdownStore>>,
    signal: Arc<ChangeSignal>,
    scheduler: TickScheduler,
    display: DisplayMap,
    rows: Vec<Countdown>,
    last_seen_revision: u64,
    title_input: String,
    target_input: String,
    description_input: String,
    status_message: Option<(String, Instant)>,
    next_tick: Instant,
    data_file: PathBuf,
    api_bind: String,
    api_port: u16,
    api_enabled: bool,
}

impl TickdownApp {
    fn new(
        store: Arc<Mutex<CountdownStore>>,
        signal: Arc<ChangeSignal>,
        data_file: PathBuf,
        api_bind: String,
        api_port: u16,
        api_enabled: bool,
    ) -> Result<Self> {
        let display: DisplayMap = Rc::new(RefCell::new(HashMap::new()));
        let sink = Rc::clone(&display);
        let scheduler = TickScheduler::new(Box::new(move |id, remaining| {
            sink.borrow_mut().insert(id.to_string(), remaining);
        }));

        let mut app = Self {
            store,
            last_seen_revision: signal.revision(),
            signal,
            scheduler,
            display,
            rows: Vec::new(),
            title_input: String::new(),
            target_input: default_target_input(Local::now()),
            description_input: String::new(),
            status_message: None,
            next_tick: Instant::now(),
            data_file,
            api_bind,
            api_port,
            api_enabled,
        };
        app.reload_from_store()?;
        Ok(app)
    }

    fn set_status(&mut self, text: impl Into<String>, ttl: Duration) {
        self.status_message = Some((text.into(), Instant::now() + ttl));
    }

    /// Pulls a fresh list out of the store and re-drives registration, so
    /// the tracked set always mirrors what is persisted.
    fn reload_from_store(&mut self) -> Result<()> {
        let guard = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("countdown store lock poisoned"))?;
        let mut rows = guard.list();
        drop(guard);
        sort_rows(&mut rows);

        self.display.borrow_mut().clear();
        self.scheduler.register_all(&rows, Utc::now());
        self.rows = rows;
        self.last_seen_revision = self.signal.revision();
        Ok(())
    }

    fn create_countdown_from_form(&mut self) -> Result<String> {
        let naive = parse_local_datetime_input(self.target_input.trim())?;
        let target_utc = resolve_local_datetime(naive)?;
        let description = if self.description_input.trim().is_empty() {
            None
        } else {
            Some(self.description_input.trim().to_string())
        };

        let mut guard = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("countdown store lock poisoned"))?;
        let created = guard.create(self.title_input.trim(), target_utc, description, Utc::now())?;
        let mut rows = guard.list();
        drop(guard);
        sort_rows(&mut rows);

        self.scheduler.register(&created.id, created.target_utc);
        self.rows = rows;
        self.last_seen_revision = self.signal.revision();

        self.title_input.clear();
        self.description_input.clear();
        self.target_input = default_target_input(Local::now());
        Ok(format!(
            "Added countdown '{}' -> {}",
            created.title,
            created
                .target_utc
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
        ))
    }

    fn delete_countdown(&mut self, id: &str) -> Result<String> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("countdown store lock poisoned"))?;
        let removed = guard.delete(id)?;
        let mut rows = guard.list();
        drop(guard);
        sort_rows(&mut rows);

        self.scheduler.unregister(id);
        self.display.borrow_mut().remove(id);
        self.rows = rows;
        self.last_seen_revision = self.signal.revision();
        Ok(format!("Deleted countdown '{}'", removed.title))
    }

    /// Advances the shared once-per-second tick. A long stall (window hidden,
    /// machine asleep) resynchronizes instead of replaying every missed tick.
    fn drive_ticks(&mut self) {
        let mut steps = 0;
        while Instant::now() >= self.next_tick && steps < MAX_TICKS_PER_UPDATE {
            let outcome = self.scheduler.tick(Utc::now());
            if outcome.expired > 0 {
                log::debug!("{} countdown(s) reached their target", outcome.expired);
            }
            self.next_tick += TICK_INTERVAL;
            steps += 1;
        }
        if Instant::now() >= self.next_tick {
            self.next_tick = Instant::now();
        }
    }

    fn show_create_form(&mut self, ui: &mut egui::Ui) {
        ui.add_space(4.0);
        ui.label(RichText::new("New Countdown").strong().color(ACCENT));
        ui.horizontal(|ui| {
            ui.label("Title");
            ui.add(
                TextEdit::singleline(&mut self.title_input)
                    .desired_width(220.0)
                    .hint_text("What are you counting down to?"),
            );
            ui.label("Target");
            ui.add(
                TextEdit::singleline(&mut self.target_input)
                    .desired_width(180.0)
                    .hint_text("2030-06-01T12:00:00"),
            );
        });
        ui.horizontal(|ui| {
            ui.label("Notes");
            ui.add(
                TextEdit::singleline(&mut self.description_input)
                    .desired_width(420.0)
                    .hint_text("optional"),
            );
            if ui
                .add(egui::Button::new(RichText::new("Create").strong()))
                .clicked()
            {
                match self.create_countdown_from_form() {
                    Ok(msg) => self.set_status(msg, Duration::from_secs(3)),
                    Err(err) => {
                        self.set_status(format!("Create failed: {err:#}"), Duration::from_secs(4))
                    }
                }
            }
        });
        if let Some((text, _)) = &self.status_message {
            ui.label(RichText::new(text).color(MUTED));
        }
        ui.add_space(4.0);
    }

    fn show_countdown_list(&mut self, ui: &mut egui::Ui) {
        if self.rows.is_empty() {
            ui.add_space(16.0);
            ui.vertical_centered(|ui| {
                ui.label(
                    RichText::new("No countdowns yet. Create your first one above!").color(MUTED),
                );
            });
            return;
        }

        let mut pending_delete: Option<String> = None;
        ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for row in &self.rows {
                    let remaining = self.display.borrow().get(&row.id).copied();
                    ui.group(|ui| {
                        ui.horizontal(|ui| {
                            ui.vertical(|ui| {
                                ui.label(RichText::new(&row.title).strong().size(16.0));
                                if let Some(description) = &row.description {
                                    ui.label(RichText::new(description).color(MUTED));
                                }
                                ui.label(
                                    RichText::new(format!(
                                        "Target: {}",
                                        row.target_utc
                                            .with_timezone(&Local)
                                            .format("%Y-%m-%d %H:%M:%S")
                                    ))
                                    .color(MUTED)
                                    .size(11.0),
                                );
                            });
                            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                                if ui.button("Delete").clicked() {
                                    pending_delete = Some(row.id.clone());
                                }
                                let (text, color) = match remaining {
                                    Some(remaining) if remaining.expired => {
                                        (remaining.display(), EXPIRED)
                                    }
                                    Some(remaining) => (remaining.display(), ACCENT),
                                    None => ("Calculating...".to_string(), MUTED),
                                };
                                ui.label(RichText::new(text).strong().size(18.0).color(color));
                            });
                        });
                    });
                }
            });

        if let Some(id) = pending_delete {
            match self.delete_countdown(&id) {
                Ok(msg) => self.set_status(msg, Duration::from_secs(3)),
                Err(err) => {
                    self.set_status(format!("Delete failed: {err:#}"), Duration::from_secs(4))
                }
            }
        }
    }
}

impl eframe::App for TickdownApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some((_, expires_at)) = &self.status_message
            && Instant::now() >= *expires_at
        {
            self.status_message = None;
        }

        // Another writer (the HTTP API) moved the store underneath us.
        if self.signal.revision() != self.last_seen_revision
            && let Err(err) = self.reload_from_store()
        {
            self.set_status(format!("Reload failed: {err:#}"), Duration::from_secs(4));
        }

        self.drive_ticks();

        egui::TopBottomPanel::top("create_form")
            .resizable(false)
            .show(ctx, |ui| self.show_create_form(ui));

        egui::TopBottomPanel::bottom("footer")
            .resizable(false)
            .show(ctx, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(
                        RichText::new(format!(
                            "Countdowns persist to {} on each change.",
                            self.data_file.display()
                        ))
                        .color(MUTED),
                    );
                    ui.separator();
                    ui.label(
                        RichText::new(format!("{} ticking", self.scheduler.active_len()))
                            .color(MUTED),
                    );
                    ui.separator();
                    if self.api_enabled {
                        ui.label(
                            RichText::new(format!(
                                "API http://{}:{}/v1",
                                self.api_bind, self.api_port
                            ))
                            .color(ACCENT),
                        );
                    } else {
                        ui.label(RichText::new("API disabled").color(MUTED));
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| self.show_countdown_list(ui));

        let wait = self.next_tick.saturating_duration_since(Instant::now());
        ctx.request_repaint_after(wait);
    }
}

fn default_target_input(now_local: DateTime<Local>) -> String {
    (now_local + chrono::Duration::hours(1))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn sort_rows(rows: &mut [Countdown]) {
    rows.sort_by(|a, b| {
        a.target_utc
            .cmp(&b.target_utc)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn parse_local_datetime_input(input: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M"))
        .map_err(|_| anyhow::anyhow!("invalid datetime '{input}'"))
}

/// Pins a wall-clock entry to an instant. A fall-back ambiguity takes the
/// first occurrence; a spring-forward gap is rejected rather than guessed.
fn resolve_local_datetime(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(instant) => Ok(instant.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _second) => Ok(first.with_timezone(&Utc)),
        LocalResult::None => Err(anyhow::anyhow!(
            "local time {naive} does not exist (daylight saving gap)"
        )),
    }
}
