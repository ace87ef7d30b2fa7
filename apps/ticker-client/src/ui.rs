//! The client-side UI model and the reconciliation rules that mutate it.

use std::collections::{BTreeMap, BTreeSet};

use ticker_proto::{FullState, Menu};

use crate::markup::{self, Tag};

/// Container that full-state bodies and `update` frames replace wholesale.
pub const BODY_TARGET: &str = "bodyContent";
/// Status-message area.
pub const MESSAGE_TARGET: &str = "message";
pub const TITLE_TARGET: &str = "title";
pub const DATETIME_TARGET: &str = "datetime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Input { input_type: String, value: String },
    Block { content: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub kind: ElementKind,
    /// Container whose markup created this element; `None` for the shell.
    pub owner: Option<String>,
    pub attrs: Vec<(String, String)>,
}

impl Element {
    fn from_tag(tag: &Tag, owner: &str) -> Self {
        let kind = if tag.is_text_entry() {
            ElementKind::Input {
                input_type: tag.attr("type").unwrap_or("text").to_ascii_lowercase(),
                value: tag.attr("value").unwrap_or_default().to_string(),
            }
        } else {
            ElementKind::Block {
                content: tag.text.clone(),
            }
        };
        Self {
            tag: tag.name.clone(),
            kind,
            owner: Some(owner.to_string()),
            attrs: tag.attrs.clone(),
        }
    }

    fn shell(tag: &str) -> Self {
        Self {
            tag: tag.into(),
            kind: ElementKind::Block {
                content: String::new(),
            },
            owner: None,
            attrs: Vec::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, ElementKind::Input { .. })
    }

    pub fn text(&self) -> &str {
        match &self.kind {
            ElementKind::Input { value, .. } => value,
            ElementKind::Block { content } => content,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItemView {
    pub name: String,
    pub url: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuView {
    pub name: String,
    pub items: Vec<MenuItemView>,
}

/// What activating a menu item does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    /// Emits a `menuClick` frame.
    Click,
    /// Native navigation; no frame.
    Link(String),
    Disabled,
}

impl MenuItemView {
    pub fn action(&self) -> MenuAction {
        if self.disabled {
            MenuAction::Disabled
        } else if let Some(url) = &self.url {
            MenuAction::Link(url.clone())
        } else {
            MenuAction::Click
        }
    }
}

impl From<&Menu> for MenuView {
    fn from(menu: &Menu) -> Self {
        Self {
            name: menu.name.clone(),
            items: menu
                .items
                .iter()
                .map(|item| MenuItemView {
                    name: item.name.clone(),
                    url: item.url.clone(),
                    disabled: item.disabled,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Body,
    InputValue,
    Text,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiModel {
    title: String,
    body: String,
    visible: bool,
    menus: Vec<MenuView>,
    elements: BTreeMap<String, Element>,
    /// Inputs that emit `inputChange` when edited.
    listeners: BTreeSet<String>,
    stylesheets: BTreeSet<String>,
    location: Option<String>,
}

impl Default for UiModel {
    fn default() -> Self {
        let mut elements = BTreeMap::new();
        for (id, tag) in [
            (TITLE_TARGET, "div"),
            (MESSAGE_TARGET, "div"),
            (DATETIME_TARGET, "div"),
            (BODY_TARGET, "div"),
        ] {
            elements.insert(id.to_string(), Element::shell(tag));
        }
        Self {
            title: String::new(),
            body: String::new(),
            visible: false,
            menus: Vec::new(),
            elements,
            listeners: BTreeSet::new(),
            stylesheets: BTreeSet::new(),
            location: None,
        }
    }
}

impl UiModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn menus(&self) -> &[MenuView] {
        &self.menus
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn listeners(&self) -> &BTreeSet<String> {
        &self.listeners
    }

    pub fn stylesheets(&self) -> &BTreeSet<String> {
        &self.stylesheets
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    pub fn element_text(&self, id: &str) -> Option<&str> {
        self.elements.get(id).map(Element::text)
    }

    /// Ids of every element created from `owner`'s markup, recursively.
    pub fn descendants(&self, owner: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut frontier = vec![owner.to_string()];
        while let Some(parent) = frontier.pop() {
            for (id, element) in &self.elements {
                if element.owner.as_deref() == Some(parent.as_str()) {
                    found.push(id.clone());
                    frontier.push(id.clone());
                }
            }
        }
        found
    }

    /// Replaces body, visibility and menus wholesale. Returns the ids that
    /// gained an edit listener; applying the same state twice returns none.
    pub fn apply_full_state(&mut self, state: &FullState) -> Vec<String> {
        if let Some(title) = &state.title {
            self.set_title(title);
        }
        self.replace_children(BODY_TARGET, &state.body);
        self.body = state.body.clone();
        self.visible = state.is_visible;

        let inputs: BTreeSet<String> = self
            .elements
            .iter()
            .filter(|(_, element)| element.is_input())
            .map(|(id, _)| id.clone())
            .collect();
        self.listeners.retain(|id| inputs.contains(id));
        let attached: Vec<String> = inputs
            .into_iter()
            .filter(|id| self.listeners.insert(id.clone()))
            .collect();

        self.menus = state.menus.iter().map(MenuView::from).collect();
        attached
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        if let Some(element) = self.elements.get_mut(TITLE_TARGET) {
            element.kind = ElementKind::Block {
                content: title.to_string(),
            };
        }
    }

    /// Partial update of one target.
    pub fn apply_update(&mut self, target: &str, content: &str) -> UpdateOutcome {
        if target == BODY_TARGET {
            self.replace_children(BODY_TARGET, content);
            self.body = content.to_string();
            return UpdateOutcome::Body;
        }
        match self.elements.get(target).map(Element::is_input) {
            Some(true) => {
                self.set_value(target, content);
                UpdateOutcome::InputValue
            }
            Some(false) => {
                self.set_text(target, content);
                UpdateOutcome::Text
            }
            None => UpdateOutcome::Missing,
        }
    }

    /// Replaces a container's markup, as `innerHTML` assignment does.
    pub fn set_inner_markup(&mut self, id: &str, markup: &str) -> bool {
        if id == BODY_TARGET {
            self.apply_update(BODY_TARGET, markup);
            return true;
        }
        if !self.elements.contains_key(id) {
            return false;
        }
        self.replace_children(id, markup);
        if let Some(element) = self.elements.get_mut(id) {
            element.kind = ElementKind::Block {
                content: markup.to_string(),
            };
        }
        true
    }

    /// Sets an element's text content, dropping any children it had.
    pub fn set_text(&mut self, id: &str, text: &str) -> bool {
        if !self.elements.contains_key(id) {
            return false;
        }
        if id == TITLE_TARGET {
            self.set_title(text);
            return true;
        }
        self.remove_descendants(id);
        if let Some(element) = self.elements.get_mut(id) {
            element.kind = ElementKind::Block {
                content: text.to_string(),
            };
        }
        true
    }

    pub fn set_value(&mut self, id: &str, new_value: &str) -> bool {
        match self.elements.get_mut(id).map(|element| &mut element.kind) {
            Some(ElementKind::Input { value, .. }) => {
                *value = new_value.to_string();
                true
            }
            _ => false,
        }
    }

    /// A local keystroke. Returns `Some(true)` when the input carries an
    /// edit listener and the change must be echoed, `None` when there is no
    /// such input.
    pub fn edit_input(&mut self, id: &str, value: &str) -> Option<bool> {
        self.set_value(id, value)
            .then(|| self.listeners.contains(id))
    }

    pub fn input_value(&self, id: &str) -> Option<&str> {
        match self.elements.get(id).map(|element| &element.kind) {
            Some(ElementKind::Input { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn menu_item(&self, menu: &str, item: &str) -> Option<&MenuItemView> {
        self.menus
            .iter()
            .find(|view| view.name == menu)?
            .items
            .iter()
            .find(|view| view.name == item)
    }

    pub fn menu_action(&self, menu: &str, item: &str) -> Option<MenuAction> {
        self.menu_item(menu, item).map(MenuItemView::action)
    }

    /// Toggles an item locally; the device is not told.
    pub fn set_menu_item_enabled(&mut self, menu: &str, item: &str, enabled: bool) -> bool {
        let Some(view) = self
            .menus
            .iter_mut()
            .find(|view| view.name == menu)
            .and_then(|view| view.items.iter_mut().find(|view| view.name == item))
        else {
            return false;
        };
        view.disabled = !enabled;
        true
    }

    pub fn navigate(&mut self, url: &str) {
        self.location = Some(url.to_string());
    }

    /// Records a stylesheet; returns `false` when it was already linked.
    pub fn link_stylesheet(&mut self, path: &str) -> bool {
        self.stylesheets.insert(path.to_string())
    }

    fn remove_descendants(&mut self, owner: &str) {
        for id in self.descendants(owner) {
            self.elements.remove(&id);
        }
    }

    fn replace_children(&mut self, owner: &str, markup: &str) {
        self.remove_descendants(owner);
        for tag in markup::scan(markup) {
            let Some(id) = tag.id() else {
                continue;
            };
            // Shell elements are not reachable through body markup.
            if self
                .elements
                .get(id)
                .is_some_and(|existing| existing.owner.is_none())
            {
                continue;
            }
            self.elements
                .insert(id.to_string(), Element::from_tag(&tag, owner));
        }
    }
}
