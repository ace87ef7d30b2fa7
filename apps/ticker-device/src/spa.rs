//! Page and menu registry plus the push primitives the rest of the device
//! uses to drive connected browsers.
//!
//! Exactly one page is active. Activating a page broadcasts its full state;
//! everything else (status text, popups, element updates, function calls)
//! goes out as a single frame to one client or to all of them.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use ticker_proto::{FullState, Menu, MenuItem, Notice, ServerFrame};
use tracing::{debug, info};

use crate::hub::{ClientHub, ClientId};
use crate::invocations::InvocationTracker;
use crate::pages::Handler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaError {
    #[error("unknown page `{0}`")]
    UnknownPage(String),
    #[error("page `{page}` has no menu `{menu}`")]
    UnknownMenu { page: String, menu: String },
    #[error("menu `{menu}` has no item `{item}`")]
    UnknownItem { menu: String, item: String },
}

pub type SpaResult<T> = Result<T, SpaError>;

/// What a menu item does when clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuBinding {
    Handler(Handler),
    /// The browser navigates by itself; the device never sees the click.
    Link(String),
    /// Markup shown as a popup with id [`popup_id`].
    Popup(String),
}

/// Where a frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Client(ClientId),
}

#[derive(Debug, Clone)]
struct Page {
    name: String,
    title: String,
    body: String,
    menus: Vec<PageMenu>,
}

#[derive(Debug, Clone)]
struct PageMenu {
    name: String,
    items: Vec<PageItem>,
}

#[derive(Debug, Clone)]
struct PageItem {
    name: String,
    binding: MenuBinding,
    disabled: bool,
}

#[derive(Default)]
struct SpaState {
    pages: Vec<Page>,
    active: Option<String>,
    scripts: Vec<String>,
    stylesheets: Vec<String>,
}

impl SpaState {
    fn page(&self, name: &str) -> SpaResult<&Page> {
        self.pages
            .iter()
            .find(|page| page.name == name)
            .ok_or_else(|| SpaError::UnknownPage(name.to_string()))
    }

    fn page_mut(&mut self, name: &str) -> SpaResult<&mut Page> {
        self.pages
            .iter_mut()
            .find(|page| page.name == name)
            .ok_or_else(|| SpaError::UnknownPage(name.to_string()))
    }

    fn menu_mut(&mut self, page: &str, menu: &str) -> SpaResult<&mut PageMenu> {
        self.page_mut(page)?
            .menus
            .iter_mut()
            .find(|candidate| candidate.name == menu)
            .ok_or_else(|| SpaError::UnknownMenu {
                page: page.to_string(),
                menu: menu.to_string(),
            })
    }
}

/// `"FS Manager"`, `"Upload File"` -> `popup_FS_Manager_Upload_File`.
pub fn popup_id(menu: &str, item: &str) -> String {
    format!("popup_{menu}_{item}").replace(' ', "_")
}

#[derive(Clone)]
pub struct Spa {
    hub: ClientHub,
    tracker: InvocationTracker,
    state: Arc<RwLock<SpaState>>,
}

impl Spa {
    pub fn new(hub: ClientHub, tracker: InvocationTracker) -> Self {
        Self {
            hub,
            tracker,
            state: Arc::new(RwLock::new(SpaState::default())),
        }
    }

    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    /// Adds a page, or replaces the body of an existing one. The first page
    /// added becomes active.
    pub fn add_page(&self, name: &str, body: &str) {
        let mut state = self.state.write();
        if let Ok(page) = state.page_mut(name) {
            page.body = body.to_string();
            return;
        }
        state.pages.push(Page {
            name: name.to_string(),
            title: name.to_string(),
            body: body.to_string(),
            menus: Vec::new(),
        });
        if state.active.is_none() {
            state.active = Some(name.to_string());
        }
    }

    pub fn set_page_title(&self, page: &str, title: &str) -> SpaResult<()> {
        self.state.write().page_mut(page)?.title = title.to_string();
        Ok(())
    }

    pub fn page_exists(&self, page: &str) -> bool {
        self.state.read().page(page).is_ok()
    }

    pub fn active_page_name(&self) -> Option<String> {
        self.state.read().active.clone()
    }

    pub fn add_menu(&self, page: &str, menu: &str) -> SpaResult<()> {
        let mut state = self.state.write();
        let page = state.page_mut(page)?;
        if !page.menus.iter().any(|existing| existing.name == menu) {
            page.menus.push(PageMenu {
                name: menu.to_string(),
                items: Vec::new(),
            });
        }
        Ok(())
    }

    pub fn add_menu_item(
        &self,
        page: &str,
        menu: &str,
        item: &str,
        binding: MenuBinding,
    ) -> SpaResult<()> {
        let mut state = self.state.write();
        let menu = state.menu_mut(page, menu)?;
        match menu.items.iter_mut().find(|existing| existing.name == item) {
            Some(existing) => existing.binding = binding,
            None => menu.items.push(PageItem {
                name: item.to_string(),
                binding,
                disabled: false,
            }),
        }
        Ok(())
    }

    pub fn enable_menu_item(&self, page: &str, menu: &str, item: &str) -> SpaResult<()> {
        self.set_item_disabled(page, menu, item, false)
    }

    pub fn disable_menu_item(&self, page: &str, menu: &str, item: &str) -> SpaResult<()> {
        self.set_item_disabled(page, menu, item, true)
    }

    fn set_item_disabled(&self, page: &str, menu: &str, item: &str, disabled: bool) -> SpaResult<()> {
        let is_active = {
            let mut state = self.state.write();
            let menu_name = menu.to_string();
            let entry = state
                .menu_mut(page, menu)?
                .items
                .iter_mut()
                .find(|candidate| candidate.name == item)
                .ok_or_else(|| SpaError::UnknownItem {
                    menu: menu_name,
                    item: item.to_string(),
                })?;
            if entry.disabled == disabled {
                return Ok(());
            }
            entry.disabled = disabled;
            state.active.as_deref() == Some(page)
        };
        if is_active {
            self.broadcast_active_state();
        }
        Ok(())
    }

    pub fn full_state(&self, page: &str) -> SpaResult<FullState> {
        let state = self.state.read();
        Ok(render_page(state.page(page)?))
    }

    pub fn active_state(&self) -> Option<FullState> {
        let state = self.state.read();
        let active = state.active.as_deref()?;
        state.page(active).ok().map(render_page)
    }

    /// Makes `page` the active page and pushes it to every client.
    pub fn activate_page(&self, page: &str) -> SpaResult<()> {
        {
            let mut state = self.state.write();
            state.page(page)?;
            state.active = Some(page.to_string());
        }
        info!(page = %page, "page activated");
        self.broadcast_active_state();
        Ok(())
    }

    pub fn send_active_state(&self, client: ClientId) {
        if let Some(state) = self.active_state() {
            self.send(Audience::Client(client), &ServerFrame::FullState(state));
        }
    }

    fn broadcast_active_state(&self) {
        if let Some(state) = self.active_state() {
            self.send(Audience::All, &ServerFrame::FullState(state));
        }
    }

    /// Finds what a click on `menu`/`item` should do. The active page is
    /// searched first; disabled items resolve to nothing.
    pub fn resolve_click(&self, menu: &str, item: &str) -> Option<MenuBinding> {
        let state = self.state.read();
        let active = state.active.as_deref();
        let ordered = state
            .pages
            .iter()
            .filter(|page| Some(page.name.as_str()) == active)
            .chain(state.pages.iter().filter(|page| Some(page.name.as_str()) != active));
        for page in ordered {
            let found = page
                .menus
                .iter()
                .filter(|candidate| candidate.name == menu)
                .flat_map(|candidate| candidate.items.iter())
                .find(|candidate| candidate.name == item);
            if let Some(found) = found {
                if found.disabled {
                    debug!(menu = %menu, item = %item, "click on disabled menu item");
                    return None;
                }
                return Some(found.binding.clone());
            }
        }
        None
    }

    pub fn set_message(&self, text: &str, seconds: u64) {
        self.notify(Audience::All, &Notice::status(text, seconds * 1000));
    }

    pub fn set_error_message(&self, text: &str, seconds: u64) {
        self.notify(Audience::All, &Notice::error(text, seconds * 1000));
    }

    /// Message popup; one that never closes by itself gets a close button.
    pub fn set_popup_message(&self, text: &str, seconds: u64) {
        self.notify(
            Audience::All,
            &Notice::popup(text, seconds * 1000, seconds == 0),
        );
    }

    pub fn notify(&self, audience: Audience, notice: &Notice) {
        self.send_raw(audience, &notice.to_json());
    }

    /// Pushes a function call and tracks it until the client answers.
    pub fn call_js_function(&self, audience: Audience, name: &str, params: Option<Value>) {
        let frame = ServerFrame::call(name, params).to_json();
        for client in self.send_raw(audience, &frame) {
            self.tracker.record(client, name);
        }
    }

    /// Registers a script every client loads after `pageLoaded`, and pushes
    /// it to the clients already connected.
    pub fn include_js_file(&self, path: &str) {
        {
            let mut state = self.state.write();
            if state.scripts.iter().any(|known| known == path) {
                return;
            }
            state.scripts.push(path.to_string());
        }
        self.send(Audience::All, &ServerFrame::IncludeJsFile { path: path.into() });
    }

    pub fn include_css_file(&self, path: &str) {
        {
            let mut state = self.state.write();
            if state.stylesheets.iter().any(|known| known == path) {
                return;
            }
            state.stylesheets.push(path.to_string());
        }
        self.send(Audience::All, &ServerFrame::IncludeCssFile { path: path.into() });
    }

    /// Replays every registered stylesheet and script to one client.
    pub fn send_includes(&self, client: ClientId) {
        let (stylesheets, scripts) = {
            let state = self.state.read();
            (state.stylesheets.clone(), state.scripts.clone())
        };
        for path in stylesheets {
            self.send(Audience::Client(client), &ServerFrame::IncludeCssFile { path });
        }
        for path in scripts {
            self.send(Audience::Client(client), &ServerFrame::IncludeJsFile { path });
        }
    }

    pub fn show_popup(&self, audience: Audience, id: &str, content: &str) {
        self.send(
            audience,
            &ServerFrame::ShowPopup {
                id: id.to_string(),
                content: content.to_string(),
            },
        );
    }

    pub fn update_target(&self, audience: Audience, target: &str, content: &str) {
        self.send(audience, &ServerFrame::update(target, content));
    }

    pub fn send(&self, audience: Audience, frame: &ServerFrame) -> Vec<ClientId> {
        self.send_raw(audience, &frame.to_json())
    }

    /// Returns the clients the frame was queued for.
    pub fn send_raw(&self, audience: Audience, text: &str) -> Vec<ClientId> {
        match audience {
            Audience::All => self.hub.broadcast(text).recipients,
            Audience::Client(client) => {
                if self.hub.send_to(client, text) {
                    vec![client]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

fn render_page(page: &Page) -> FullState {
    let menus = page
        .menus
        .iter()
        .map(|menu| Menu {
            name: menu.name.clone(),
            items: menu
                .items
                .iter()
                .map(|item| {
                    let mut rendered = match &item.binding {
                        MenuBinding::Link(url) => MenuItem::link(item.name.clone(), url.clone()),
                        _ => MenuItem::new(item.name.clone()),
                    };
                    rendered.disabled = item.disabled;
                    rendered
                })
                .collect(),
        })
        .collect();
    FullState {
        title: Some(page.title.clone()),
        body: page.body.clone(),
        is_visible: true,
        menus,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn spa() -> (Spa, ClientId, mpsc::Receiver<Message>) {
        let hub = ClientHub::new(16);
        let registration = hub.register(None);
        let spa = Spa::new(hub, InvocationTracker::new(Duration::from_secs(5)));
        (spa, registration.id, registration.receiver)
    }

    fn next(rx: &mut mpsc::Receiver<Message>) -> Value {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(&text).expect("json frame"),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    fn with_pages(spa: &Spa) {
        spa.add_page("Main", "<pre id='scrollingMonitor'></pre>");
        spa.set_page_title("Main", "esp Ticker32").expect("title");
        spa.add_menu("Main", "Main Menu").expect("menu");
        spa.add_menu_item(
            "Main",
            "Main Menu",
            "Docs",
            MenuBinding::Link("https://example.org/docs".into()),
        )
        .expect("item");
        spa.add_menu_item(
            "Main",
            "Main Menu",
            "Help",
            MenuBinding::Popup("<p>help</p>".into()),
        )
        .expect("item");
        spa.add_page("Other", "<p>other</p>");
        spa.add_menu("Other", "Other Menu").expect("menu");
        spa.add_menu_item(
            "Other",
            "Other Menu",
            "Help",
            MenuBinding::Popup("<p>other help</p>".into()),
        )
        .expect("item");
    }

    #[test]
    fn popup_ids_replace_spaces() {
        assert_eq!(popup_id("FS Manager", "Upload File"), "popup_FS_Manager_Upload_File");
    }

    #[test]
    fn first_page_is_active_and_rendered_with_links() {
        let (spa, _, _) = spa();
        with_pages(&spa);
        assert_eq!(spa.active_page_name().as_deref(), Some("Main"));

        let state = spa.active_state().expect("active page");
        assert_eq!(state.title.as_deref(), Some("esp Ticker32"));
        assert!(state.is_visible);
        assert_eq!(
            state.menus[0].item("Docs").and_then(|item| item.url.as_deref()),
            Some("https://example.org/docs")
        );
        assert_eq!(state.menus[0].item("Help").and_then(|item| item.url.clone()), None);
        assert_eq!(
            spa.set_page_title("Nope", "x"),
            Err(SpaError::UnknownPage("Nope".into()))
        );
    }

    #[test]
    fn activation_broadcasts_full_state() {
        let (spa, _, mut rx) = spa();
        with_pages(&spa);
        spa.activate_page("Other").expect("activate");
        let frame = next(&mut rx);
        assert_eq!(frame["body"], "<p>other</p>");
        assert_eq!(frame["menus"][0]["name"], "Other Menu");
        assert!(spa.activate_page("Missing").is_err());
    }

    #[test]
    fn clicks_prefer_the_active_page_and_skip_disabled_items() {
        let (spa, _, mut rx) = spa();
        with_pages(&spa);
        assert_eq!(
            spa.resolve_click("Other Menu", "Help"),
            Some(MenuBinding::Popup("<p>other help</p>".into()))
        );

        spa.disable_menu_item("Main", "Main Menu", "Help").expect("disable");
        let frame = next(&mut rx);
        assert_eq!(frame["menus"][0]["items"][1]["disabled"], true);
        assert_eq!(spa.resolve_click("Main Menu", "Help"), None);

        spa.enable_menu_item("Main", "Main Menu", "Help").expect("enable");
        assert!(spa.resolve_click("Main Menu", "Help").is_some());
        assert!(matches!(
            spa.disable_menu_item("Main", "Main Menu", "Nope"),
            Err(SpaError::UnknownItem { .. })
        ));
    }

    #[test]
    fn notices_carry_durations_in_milliseconds() {
        let (spa, _, mut rx) = spa();
        spa.set_message("Main Menu [Settings] clicked!", 5);
        let frame = next(&mut rx);
        assert_eq!(frame["message"], "Main Menu [Settings] clicked!");
        assert_eq!(frame["messageDuration"], 5000);
        assert_eq!(frame["isError"], false);

        spa.set_error_message("FSmanager is not available", 0);
        assert_eq!(next(&mut rx)["isError"], true);

        spa.set_popup_message("Saving ...", 0);
        let popup = next(&mut rx);
        assert_eq!(popup["isPopup"], true);
        assert_eq!(popup["showCloseButton"], true);
    }

    #[test]
    fn pushes_use_the_event_family_and_are_tracked() {
        let (spa, client, mut rx) = spa();
        spa.call_js_function(Audience::All, "queueMessageToMonitor", Some(json!("* hi *")));
        let call = next(&mut rx);
        assert_eq!(call, json!({"event": "callJsFunction", "data": "queueMessageToMonitor", "params": "* hi *"}));
        assert!(spa.tracker.acknowledge(client, "queueMessageToMonitor"));

        spa.include_js_file("/SYS/espTicker32.js");
        spa.include_js_file("/SYS/espTicker32.js");
        spa.include_css_file("/SYS/FSmanager.css");
        assert_eq!(next(&mut rx)["event"], "includeJsFile");
        assert_eq!(next(&mut rx)["event"], "includeCssFile");
        assert!(rx.try_recv().is_err());

        spa.send_includes(client);
        assert_eq!(next(&mut rx), json!({"event": "includeCssFile", "data": "/SYS/FSmanager.css"}));
        assert_eq!(next(&mut rx), json!({"event": "includeJsFile", "data": "/SYS/espTicker32.js"}));

        spa.show_popup(Audience::Client(client), "popup_x", "<p>x</p>");
        assert_eq!(next(&mut rx), json!({"event": "showPopup", "id": "popup_x", "content": "<p>x</p>"}));
        spa.update_target(Audience::Client(client), "settingsName", "Device Settings");
        assert_eq!(next(&mut rx)["target"], "settingsName");
    }
}
