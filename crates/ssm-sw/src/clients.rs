//! Clients API: windows the controller can open, focus, or look up.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::{Result, SwError};

/// A client (controlled page).
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Frame type.
    pub frame_type: FrameType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Auxiliary,
    TopLevel,
    Nested,
    None,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// What `open_window` did to satisfy the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAction {
    Opened,
    Focused,
}

impl Client {
    /// A top-level window client at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            frame_type: FrameType::TopLevel,
            visibility_state: VisibilityState::Visible,
            focused: false,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) -> Result<()> {
        if self.client_type != ClientType::Window {
            return Err(SwError::State("Can only focus window clients".to_string()));
        }
        self.focused = true;
        self.visibility_state = VisibilityState::Visible;
        Ok(())
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients of a type.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// The focused window, if any.
    pub fn focused(&self) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| c.client_type == ClientType::Window && c.focused)
    }

    /// Open a window at `url`, or focus one already showing it.
    pub fn open_window(&mut self, url: Url) -> Result<(Client, WindowAction)> {
        let existing = self
            .clients
            .values()
            .find(|c| c.client_type == ClientType::Window && c.url == url)
            .map(|c| c.id.clone());

        let (id, action) = match existing {
            Some(id) => (id, WindowAction::Focused),
            None => {
                let client = Client::window(url);
                let id = client.id.clone();
                self.clients.insert(id.clone(), client);
                (id, WindowAction::Opened)
            }
        };

        let client = self.focus(&id)?;
        Ok((client, action))
    }

    /// Focus a client, blurring every other window.
    pub fn focus(&mut self, id: &str) -> Result<Client> {
        let target = self
            .clients
            .get_mut(id)
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))?;
        target.focus()?;

        for client in self.clients.values_mut() {
            if client.id != id {
                client.focused = false;
            }
        }

        self.clients
            .get(id)
            .cloned()
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
