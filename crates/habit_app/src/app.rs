use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use habit_coach::gemini::{API_KEY_ENV, DEFAULT_GEMINI_MODEL};
use habit_coach::{ChatSession, GeminiCompletionService, RejectReason, SendOutcome};
use habit_core::streak::history_graph;
use habit_core::{
    compute_streak, today_local, AuthState, CredentialProvider, DocumentStore, Habit, HabitStore,
    InMemoryDocumentStore, NewHabit, Subscription, UserId,
};
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Longest history strip a row will render.
const MAX_HISTORY_DAYS: usize = 366;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) user_id: Option<String>,
    pub(crate) gemini_api_key: Option<String>,
    pub(crate) coach_model: String,
    pub(crate) history_days: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(user) = lookup("HABIT_USER_ID") {
            let user = user.trim();
            config.user_id = (!user.is_empty()).then(|| user.to_string());
        }
        if let Some(key) = lookup(API_KEY_ENV) {
            let key = key.trim();
            if !key.is_empty() {
                config.gemini_api_key = Some(key.to_string());
            }
        }
        if let Some(model) = lookup("HABIT_COACH_MODEL") {
            if !model.trim().is_empty() {
                config.coach_model = model.trim().to_string();
            }
        }
        if let Some(days) = lookup("HABIT_HISTORY_DAYS") {
            if let Ok(value) = days.trim().parse::<usize>() {
                if value > 0 {
                    config.history_days = value.min(MAX_HISTORY_DAYS);
                }
            }
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_id: Some("local-user".to_string()),
            gemini_api_key: None,
            coach_model: DEFAULT_GEMINI_MODEL.to_string(),
            history_days: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    List,
    Add(String),
    Toggle(usize),
    Delete(usize),
    Chat(String),
    Transcript,
    Login(String),
    Logout,
    Help,
    Quit,
    Unknown(String),
}

pub(crate) fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (trimmed, ""),
    };
    let index = |rest: &str| rest.parse::<usize>().ok().filter(|n| *n > 0);
    match verb.to_ascii_lowercase().as_str() {
        "" | "list" | "ls" => Command::List,
        "add" => Command::Add(rest.to_string()),
        "toggle" | "done" => match index(rest) {
            Some(n) => Command::Toggle(n),
            None => Command::Unknown(trimmed.to_string()),
        },
        "delete" | "rm" => match index(rest) {
            Some(n) => Command::Delete(n),
            None => Command::Unknown(trimmed.to_string()),
        },
        "chat" | "ask" => Command::Chat(rest.to_string()),
        "transcript" => Command::Transcript,
        "login" if !rest.is_empty() => Command::Login(rest.to_string()),
        "logout" => Command::Logout,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(trimmed.to_string()),
    }
}

struct HabitController {
    habits: HabitStore,
    auth: Arc<AuthState>,
    view: Arc<RwLock<Vec<Habit>>>,
    subscription: Subscription,
    chat: Option<ChatSession>,
    pending_delete: Option<Habit>,
    config: AppConfig,
}

impl HabitController {
    fn new(store: Arc<dyn DocumentStore>, auth: Arc<AuthState>, config: AppConfig) -> Self {
        info!(
            user = ?auth.current_user(),
            coach = config.gemini_api_key.is_some(),
            "initializing controller"
        );
        Self {
            habits: HabitStore::builder(store).build(),
            auth,
            view: Arc::default(),
            subscription: Subscription::inert(),
            chat: None,
            pending_delete: None,
            config,
        }
    }

    /// Follows whoever is signed in now. The chat starts over with each identity.
    async fn resubscribe(&mut self) -> Result<()> {
        self.subscription = Subscription::inert();
        self.view.write().clear();
        self.pending_delete = None;
        self.chat = self.build_chat();

        let user = self.auth.current_user();
        let view = self.view.clone();
        self.subscription = self
            .habits
            .subscribe(user.as_ref(), move |habits| *view.write() = habits)
            .await
            .context("failed to subscribe to habits")?;
        debug!(user = ?user, "habit subscription refreshed");
        Ok(())
    }

    fn build_chat(&self) -> Option<ChatSession> {
        let key = self.config.gemini_api_key.as_ref()?;
        let service = GeminiCompletionService::new(key.clone()).with_model(&self.config.coach_model);
        Some(ChatSession::new(Arc::new(service)))
    }

    fn snapshot(&self) -> Vec<Habit> {
        self.view.read().clone()
    }

    fn habit_at(&self, index: usize) -> Option<Habit> {
        self.view.read().get(index.checked_sub(1)?).cloned()
    }

    fn signed_in_user(&self) -> Option<UserId> {
        let user = self.auth.current_user();
        if user.is_none() {
            println!("Sign in first: login <user-id>");
        }
        user
    }

    /// Returns `false` once the user asks to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        if let Some(habit) = self.pending_delete.take() {
            if line.trim().eq_ignore_ascii_case("y") {
                self.delete(habit).await;
            } else {
                println!("Kept \"{}\".", habit.name);
            }
            return true;
        }

        match parse_command(line) {
            Command::List => self.render(),
            Command::Add(name) => self.add(name).await,
            Command::Toggle(index) => self.toggle(index).await,
            Command::Delete(index) => match self.habit_at(index) {
                Some(habit) => {
                    println!("Delete \"{}\"? This cannot be undone. [y/N]", habit.name);
                    self.pending_delete = Some(habit);
                }
                None => println!("No habit #{index}."),
            },
            Command::Chat(text) => self.chat(&text).await,
            Command::Transcript => self.transcript(),
            Command::Login(user) => self.auth.sign_in(UserId::new(user)),
            Command::Logout => self.auth.sign_out(),
            Command::Help => print_help(),
            Command::Quit => return false,
            Command::Unknown(input) => println!("Unknown command `{input}`. Type `help`."),
        }
        true
    }

    async fn add(&self, name: String) {
        let Some(user) = self.signed_in_user() else {
            return;
        };
        match self.habits.add_habit(&user, NewHabit::named(name)).await {
            Ok(()) => self.render(),
            Err(err) if err.is_validation() => println!("Please enter a habit name."),
            Err(err) => {
                warn!(%err, "add failed");
                println!("Failed to add habit.");
            }
        }
    }

    async fn toggle(&self, index: usize) {
        let Some(user) = self.signed_in_user() else {
            return;
        };
        let Some(habit) = self.habit_at(index) else {
            println!("No habit #{index}.");
            return;
        };
        let completed = habit.completed_dates.toggled(today_local());
        match self
            .habits
            .toggle_completion(&user, &habit.id, &completed)
            .await
        {
            Ok(()) => self.render(),
            Err(err) => {
                warn!(%err, "toggle failed");
                println!("Failed to update habit.");
            }
        }
    }

    async fn delete(&self, habit: Habit) {
        let Some(user) = self.signed_in_user() else {
            return;
        };
        match self.habits.delete_habit(&user, &habit.id).await {
            Ok(()) => self.render(),
            Err(err) => {
                warn!(%err, "delete failed");
                println!("Failed to delete habit.");
            }
        }
    }

    async fn chat(&self, text: &str) {
        let Some(chat) = &self.chat else {
            println!("The coach is unavailable: set {API_KEY_ENV} to enable it.");
            return;
        };
        let habits = self.snapshot();
        match chat.send(text, &habits).await {
            SendOutcome::Rejected(RejectReason::EmptyMessage) => println!("Type a message after `chat`."),
            SendOutcome::Rejected(RejectReason::RequestInFlight) => {
                println!("The coach is still answering.")
            }
            SendOutcome::Replied | SendOutcome::Failed => {
                if let Some(reply) = chat.history().last() {
                    println!("\n{}\n", reply.text);
                }
            }
        }
    }

    fn transcript(&self) {
        let Some(chat) = &self.chat else {
            println!("No conversation yet.");
            return;
        };
        for message in chat.history() {
            let speaker = if message.is_from_user { "you" } else { "coach" };
            println!("{speaker}> {}", message.text);
        }
    }

    fn render(&self) {
        let habits = self.snapshot();
        if habits.is_empty() {
            println!("No habits yet. Add one with: add <name>");
            return;
        }
        let today = today_local();
        for (idx, habit) in habits.iter().enumerate() {
            println!("{}", render_row(idx + 1, habit, today, self.config.history_days));
        }
    }
}

fn render_row(number: usize, habit: &Habit, today: NaiveDate, history_days: usize) -> String {
    let streak = compute_streak(&habit.completed_dates, today);
    format!(
        "{:>2}. [{}] {}  {}  streak {} day{}",
        number,
        if habit.is_completed_on(today) { 'x' } else { ' ' },
        habit.name,
        history_graph(&habit.completed_dates, history_days, today),
        streak,
        if streak == 1 { "" } else { "s" }
    )
}

fn print_help() {
    println!(
        "Commands:\n  list\n  add <name>\n  toggle <n>   mark today done / undone\n  \
         delete <n>\n  chat <message>\n  transcript\n  login <user-id>\n  logout\n  quit"
    );
}

pub async fn run(config: AppConfig) -> Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let auth = Arc::new(match &config.user_id {
        Some(user) => AuthState::signed_in(UserId::new(user)),
        None => AuthState::signed_out(),
    });
    let mut auth_changes = auth.watch();
    let mut controller = HabitController::new(store, auth, config);
    controller.resubscribe().await?;

    print_help();
    controller.render();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = auth_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                controller.resubscribe().await?;
                controller.render();
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    break;
                };
                if !controller.handle_line(&line).await {
                    break;
                }
            }
        }
    }
    info!("shutting down");
    Ok(())
}
