//! The single-owner session task.
//!
//! Everything that mutates client state funnels through one inbox and is
//! handled strictly in order: frames from the device, resource-load
//! completions, timer expiries, file-manager results and user actions. The
//! task publishes a [`SessionView`] snapshot after each one.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use ticker_proto::{FileList, Notice, ServerFrame, SettingsForm};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::ChannelHandle;
use crate::emitter::Emitter;
use crate::fsm::{self, FsmClient};
use crate::invoke::{
    normalize_resource_path, Args, CustomHandlers, DeferredCall, InvokeError, PendingResources,
    Registry, ResourceFetcher, ScriptCatalog,
};
use crate::monitor::MonitorHandle;
use crate::popup::{Popup, PopupManager};
use crate::router;
use crate::status::StatusLine;
use crate::ticker::{self, FormStore, LocalMessages};
use crate::ui::{MenuAction, UiModel, UpdateOutcome, MESSAGE_TARGET};

/// Something a person does to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    EditInput { id: String, value: String },
    ClickMenu { menu: String, item: String },
    /// Presses the n-th handler-bearing button of the open popup.
    PressPopupButton(usize),
    SetPopupInput { id: String, value: String },
    ChooseFile(PathBuf),
    EditSetting { field: String, value: String },
    EditLocalMessage { index: usize, value: String },
    Invoke { name: String, args: Args },
}

#[derive(Debug)]
pub enum SessionEvent {
    ScriptLoaded {
        path: String,
        outcome: Result<(), String>,
    },
    StylesheetLoaded {
        path: String,
        outcome: Result<(), String>,
    },
    /// A local operation scheduled by another operation.
    Call { name: String, args: Args },
    StatusExpired(u64),
    PopupTick(u64),
    PopupExpired(u64),
    FilesListed(Result<FileList, String>),
    FsmDone {
        operation: &'static str,
        outcome: Result<String, String>,
    },
    User(UserAction),
}

/// Everything operations may touch.
pub struct ClientState {
    pub config: Arc<ClientConfig>,
    pub ui: UiModel,
    pub status: StatusLine,
    pub popups: PopupManager,
    pub emitter: Emitter,
    pub monitor: MonitorHandle,
    pub forms: FormStore,
    pub local_messages: LocalMessages,
    pub files: Option<FileList>,
    pub fsm: FsmClient,
    /// Failures shown to the user as blocking alerts.
    pub alerts: Vec<String>,
    pub selected_file: Option<PathBuf>,
    inbox: mpsc::UnboundedSender<SessionEvent>,
}

impl ClientState {
    pub fn inbox(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.inbox.clone()
    }

    pub fn post(&self, event: SessionEvent) {
        let _ = self.inbox.send(event);
    }

    /// Runs the named local operation after `delay`.
    pub fn call_later(&self, delay: Duration, name: &str, args: Args) {
        let inbox = self.inbox();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(SessionEvent::Call { name, args });
        });
    }

    pub fn alert(&mut self, text: String) {
        warn!(alert = %text, "alert");
        self.alerts.push(text);
    }

    pub fn set_message(&mut self, text: &str, seconds: u64, is_error: bool) {
        let inbox = self.inbox();
        self.status.set_message(text, seconds, is_error, move |generation| {
            let _ = inbox.send(SessionEvent::StatusExpired(generation));
        });
    }

    /// Routes a frame's notice to the message popup or the status line.
    pub fn apply_notice(&mut self, notice: &Notice) {
        let inbox = self.inbox();
        if notice.is_popup_message() {
            self.popups.show_message(notice, move |generation| {
                let _ = inbox.send(SessionEvent::PopupTick(generation));
            });
        } else {
            self.status.apply(notice, move |generation| {
                let _ = inbox.send(SessionEvent::StatusExpired(generation));
            });
        }
    }

    fn snapshot(&self) -> SessionView {
        SessionView {
            ui: self.ui.clone(),
            status: self.status.text().to_string(),
            status_class: self.status.class(),
            popup: self.popups.current().cloned(),
            alerts: self.alerts.clone(),
            local_messages: self.local_messages.items().to_vec(),
            settings: self
                .forms
                .active()
                .and_then(|key| self.forms.form(key))
                .cloned(),
            files: self.files.clone(),
            current_folder: self.fsm.current_folder(),
        }
    }
}

/// Read-only snapshot of the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub ui: UiModel,
    pub status: String,
    pub status_class: Option<&'static str>,
    pub popup: Option<Popup>,
    pub alerts: Vec<String>,
    pub local_messages: Vec<String>,
    pub settings: Option<SettingsForm>,
    pub files: Option<FileList>,
    pub current_folder: String,
}

/// Sending side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub fn act(&self, action: UserAction) -> bool {
        self.inbox.send(SessionEvent::User(action)).is_ok()
    }

    pub fn invoke(&self, name: &str, args: Args) -> bool {
        self.act(UserAction::Invoke {
            name: name.to_string(),
            args,
        })
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Resolves once the view satisfies `predicate`; `None` if the session
    /// has stopped.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<SessionView>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut view = self.view.clone();
        let found = view.wait_for(|current| predicate(current)).await.ok()?;
        Some(found.clone())
    }
}

pub struct Session {
    state: ClientState,
    registry: Registry<ClientState>,
    customs: CustomHandlers<ClientState>,
    catalog: ScriptCatalog<ClientState>,
    pending: PendingResources,
    scripts: BTreeSet<String>,
    fetcher: Arc<dyn ResourceFetcher>,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
    view: watch::Sender<SessionView>,
}

impl Session {
    pub fn new(
        config: Arc<ClientConfig>,
        channel: ChannelHandle,
        monitor: MonitorHandle,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Result<(Self, SessionHandle)> {
        let fsm = FsmClient::new(&config.http_base())?;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let state = ClientState {
            config,
            ui: UiModel::new(),
            status: StatusLine::new(),
            popups: PopupManager::new(),
            emitter: Emitter::new(channel),
            monitor,
            forms: FormStore::default(),
            local_messages: LocalMessages::default(),
            files: None,
            fsm,
            alerts: Vec::new(),
            selected_file: None,
            inbox: inbox_tx.clone(),
        };
        let (view_tx, view_rx) = watch::channel(state.snapshot());

        let mut registry = Registry::new();
        install_builtins(&mut registry);
        let mut catalog = ScriptCatalog::new();
        catalog.provide("espTicker32.js", ticker::install);
        catalog.provide("FSmanager.js", fsm::install);

        let session = Self {
            state,
            registry,
            customs: CustomHandlers::new(),
            catalog,
            pending: PendingResources::new(),
            scripts: BTreeSet::new(),
            fetcher,
            inbox: inbox_rx,
            view: view_tx,
        };
        let handle = SessionHandle {
            inbox: inbox_tx,
            view: view_rx,
        };
        Ok((session, handle))
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(raw) = frames.recv() => self.handle_frame(&raw),
                Some(event) = self.inbox.recv() => self.handle_event(event),
                else => break,
            }
            self.publish();
        }
        debug!("session stopped");
    }

    fn publish(&self) {
        let next = self.state.snapshot();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Decodes one frame, takes its branch, then applies its notice.
    pub fn handle_frame(&mut self, raw: &str) {
        let dispatch = match router::decode(raw) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };
        debug!(branch = ?dispatch.branch(), "dispatching frame");
        if let Some(frame) = dispatch.frame {
            self.dispatch(frame);
        }
        if let Some(notice) = dispatch.notice {
            self.state.apply_notice(&notice);
        }
    }

    fn dispatch(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::IncludeJsFile { path } => self.include_script(&path),
            ServerFrame::IncludeCssFile { path } => self.include_stylesheet(&path),
            ServerFrame::CallJsFunction { name, params } => {
                if self.pending.is_empty() {
                    self.invoke_remote(&name, params);
                } else {
                    debug!(function = %name, waiting_on = self.pending.len(), "deferring invocation");
                    self.pending.defer(DeferredCall { name, params });
                }
            }
            ServerFrame::ShowPopup { id, content } => self.state.popups.show(&id, &content),
            ServerFrame::Redirect { url } => {
                info!(url = %url, "redirected");
                self.state.ui.navigate(&url);
            }
            ServerFrame::Update { target, content } => {
                if target == MESSAGE_TARGET {
                    self.state.status.set_text(&content);
                } else if self.state.ui.apply_update(&target, &content) == UpdateOutcome::Missing {
                    debug!(target = %target, "update target not on this page");
                }
            }
            ServerFrame::Custom { action, data } => {
                match self.customs.dispatch(&mut self.state, &action, data) {
                    Ok(true) => {}
                    Ok(false) => debug!(action = %action, "no handler for custom action"),
                    Err(err) => warn!(action = %action, error = %err, "custom handler failed"),
                }
            }
            ServerFrame::FullState(full) => {
                let attached = self.state.ui.apply_full_state(&full);
                self.state.forms.reset_requests();
                debug!(listeners = attached.len(), "full state applied");
            }
        }
    }

    fn include_script(&mut self, path: &str) {
        let path = normalize_resource_path(path);
        if self.scripts.contains(&path) {
            debug!(path = %path, "script already loaded");
            return;
        }
        if !self.pending.begin(&path) {
            debug!(path = %path, "script already loading");
            return;
        }
        let fetcher = self.fetcher.clone();
        let inbox = self.state.inbox();
        tokio::spawn(async move {
            let outcome = fetcher
                .fetch(&path)
                .await
                .map(|_| ())
                .map_err(|err| format!("{err:#}"));
            let _ = inbox.send(SessionEvent::ScriptLoaded { path, outcome });
        });
    }

    fn include_stylesheet(&mut self, path: &str) {
        let path = normalize_resource_path(path);
        if !self.state.ui.link_stylesheet(&path) {
            debug!(path = %path, "stylesheet already linked");
            return;
        }
        if !self.pending.begin(&path) {
            return;
        }
        let fetcher = self.fetcher.clone();
        let inbox = self.state.inbox();
        tokio::spawn(async move {
            let outcome = fetcher
                .fetch(&path)
                .await
                .map(|_| ())
                .map_err(|err| format!("{err:#}"));
            let _ = inbox.send(SessionEvent::StylesheetLoaded { path, outcome });
        });
    }

    fn resource_done(&mut self, path: &str, outcome: Result<(), String>) {
        if let Err(err) = outcome {
            warn!(path = %path, error = %err, "resource failed to load");
        }
        for call in self.pending.finish(path) {
            self.invoke_remote(&call.name, call.params);
        }
    }

    /// Runs a device-requested operation and reports back. A missing
    /// operation reports failure; one that ran reports success even when
    /// it returned an error.
    fn invoke_remote(&mut self, name: &str, params: Option<Value>) {
        let success = match self
            .registry
            .call(&mut self.state, name, Args::from_params(params))
        {
            Ok(()) => true,
            Err(InvokeError::NotFound(_)) => {
                warn!(function = %name, "device invoked an unknown operation");
                false
            }
            Err(err) => {
                warn!(error = %err, "invoked operation failed");
                true
            }
        };
        debug!(function = %name, success, "invocation finished");
        let _ = self.state.emitter.function_result(name, success);
    }

    fn invoke_local(&mut self, name: &str, args: Args) {
        match self.registry.call(&mut self.state, name, args) {
            Ok(()) => {}
            Err(InvokeError::NotFound(name)) => warn!(function = %name, "no such operation"),
            Err(err) => warn!(error = %err, "operation failed"),
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ScriptLoaded { path, outcome } => {
                if outcome.is_ok() {
                    self.scripts.insert(path.clone());
                    if !self
                        .catalog
                        .install(&path, &mut self.registry, &mut self.customs)
                    {
                        debug!(path = %path, "script provides no operations");
                    }
                }
                self.resource_done(&path, outcome);
            }
            SessionEvent::StylesheetLoaded { path, outcome } => self.resource_done(&path, outcome),
            SessionEvent::Call { name, args } => self.invoke_local(&name, args),
            SessionEvent::StatusExpired(generation) => {
                self.state.status.expire(generation);
            }
            SessionEvent::PopupTick(generation) => {
                let inbox = self.state.inbox();
                self.state.popups.tick(generation, move |generation| {
                    let _ = inbox.send(SessionEvent::PopupExpired(generation));
                });
            }
            SessionEvent::PopupExpired(generation) => {
                self.state.popups.expire(generation);
            }
            SessionEvent::FilesListed(outcome) => fsm::show_listing(&mut self.state, outcome),
            SessionEvent::FsmDone { operation, outcome } => {
                fsm::operation_done(&mut self.state, operation, outcome)
            }
            SessionEvent::User(action) => self.handle_user(action),
        }
    }

    fn handle_user(&mut self, action: UserAction) {
        match action {
            UserAction::EditInput { id, value } => {
                if self.state.popups.set_input(&id, &value) {
                    return;
                }
                match self.state.ui.edit_input(&id, &value) {
                    Some(true) => {
                        let _ = self.state.emitter.input_change(&id, &value);
                    }
                    Some(false) => {}
                    None => debug!(id = %id, "no such input"),
                }
            }
            UserAction::ClickMenu { menu, item } => {
                match self.state.ui.menu_action(&menu, &item) {
                    Some(MenuAction::Click) => {
                        let _ = self.state.emitter.menu_click(&menu, &item);
                    }
                    Some(MenuAction::Link(url)) => self.state.ui.navigate(&url),
                    Some(MenuAction::Disabled) => debug!(menu = %menu, item = %item, "menu item disabled"),
                    None => warn!(menu = %menu, item = %item, "no such menu item"),
                }
            }
            UserAction::PressPopupButton(index) => {
                let ui = &self.state.ui;
                let press = self
                    .state
                    .popups
                    .press_button(index, |id| ui.input_value(id).map(str::to_string));
                let Some(press) = press else {
                    debug!(index, "no such popup button");
                    return;
                };
                if let Some((name, params)) = press.call {
                    self.invoke_local(&name, Args::Positional(params));
                }
                self.state.popups.close(&press.popup_id);
            }
            UserAction::SetPopupInput { id, value } => {
                if !self.state.popups.set_input(&id, &value) {
                    debug!(id = %id, "no such popup input");
                }
            }
            UserAction::ChooseFile(path) => {
                let Some((popup_id, handler)) = self.state.popups.choose_file(path.clone()) else {
                    debug!("open popup has no file input");
                    return;
                };
                self.state.selected_file = Some(path.clone());
                self.invoke_local(&handler, Args::File(path));
                self.state.popups.close(&popup_id);
            }
            UserAction::EditSetting { field, value } => {
                ticker::edit_setting(&mut self.state, &field, &value);
            }
            UserAction::EditLocalMessage { index, value } => {
                ticker::edit_local_message(&mut self.state, index, &value);
            }
            UserAction::Invoke { name, args } => self.invoke_local(&name, args),
        }
    }
}

fn unquote(token: &str) -> &str {
    token.trim().trim_matches(|c| c == '\'' || c == '"')
}

fn menu_target(args: &Args) -> Result<(String, String)> {
    let parts: Vec<String> = (0..3)
        .map_while(|index| args.text(index))
        .map(|part| unquote(&part).to_string())
        .collect();
    match parts.as_slice() {
        [_, menu, item] | [menu, item] => Ok((menu.clone(), item.clone())),
        _ => bail!("expected (menu, item), got {args:?}"),
    }
}

/// Operations that exist before any script loads.
fn install_builtins(registry: &mut Registry<ClientState>) {
    registry.register("closePopup", |state, args| {
        let id = match args.first() {
            Some(id) => unquote(&id).to_string(),
            None => match state.popups.current() {
                Some(popup) => popup.id.clone(),
                None => return Ok(()),
            },
        };
        state.popups.close(&id);
        Ok(())
    });
    registry.register("processAction", |state, args| {
        let process_type = args
            .first()
            .map(|value| unquote(&value).to_string())
            .ok_or_else(|| anyhow!("processAction needs a process type"))?;
        let (popup_id, inputs) = state.popups.collect_inputs();
        state
            .emitter
            .process(&process_type, popup_id.as_deref(), inputs)?;
        Ok(())
    });
    registry.register("enableMenuItem", |state, args| {
        let (menu, item) = menu_target(&args)?;
        if !state.ui.set_menu_item_enabled(&menu, &item, true) {
            debug!(menu = %menu, item = %item, "menu item not found");
        }
        Ok(())
    });
    registry.register("disableMenuItem", |state, args| {
        let (menu, item) = menu_target(&args)?;
        if !state.ui.set_menu_item_enabled(&menu, &item, false) {
            debug!(menu = %menu, item = %item, "menu item not found");
        }
        Ok(())
    });
    registry.register("setMessage", |state, args| {
        let text = args.first().unwrap_or_default();
        let seconds = args
            .text(1)
            .and_then(|value| unquote(&value).parse::<f64>().ok())
            .map(|value| value.max(0.0) as u64)
            .unwrap_or(0);
        let is_error = args.text(2).is_some_and(|value| unquote(&value) == "true");
        state.set_message(&text, seconds, is_error);
        Ok(())
    });
}
