use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use super::AuthError;

/// A message delivered to the current window by another browsing context.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

/// Where a login frame is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameParent {
    Body,
    /// Element identified by the host, e.g. a DOM id.
    Element(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub parent: FrameParent,
    pub url: Url,
    pub width: u32,
    pub height: u32,
    pub hidden: bool,
}

impl FrameRequest {
    /// Zero-size, hidden frame attached to the document body.
    pub fn hidden(url: Url) -> Self {
        Self {
            parent: FrameParent::Body,
            url,
            width: 0,
            height: 0,
            hidden: true,
        }
    }

    pub fn visible(parent: FrameParent, url: Url, width: u32, height: u32) -> Self {
        Self {
            parent,
            url,
            width,
            height,
            hidden: false,
        }
    }
}

pub trait FrameHandle: Send {
    fn remove(&mut self);
}

pub trait PopupHandle: Send + Sync {
    fn is_closed(&self) -> bool;
}

/// Browser capabilities the login flows depend on.
pub trait HostEnvironment: Send + Sync {
    /// Current document URL.
    fn location(&self) -> Url;

    /// Navigate the whole page away, replacing the current history entry.
    fn replace_location(&self, url: &Url);

    /// Cross-origin isolated pages cannot receive cross-window messages.
    fn cross_origin_isolated(&self) -> bool;

    fn secure_crypto_available(&self) -> bool {
        true
    }

    fn durable_storage_available(&self) -> bool {
        true
    }

    fn session_storage_available(&self) -> bool {
        true
    }

    /// Register a window message handler. Dropping the receiver deregisters it.
    fn listen_messages(&self) -> UnboundedReceiver<WindowMessage>;

    fn mount_frame(&self, request: FrameRequest) -> Result<Box<dyn FrameHandle>, AuthError>;

    /// `None` when the window could not be opened.
    fn open_popup(&self, url: &Url, name: &str, features: &str) -> Option<Box<dyn PopupHandle>>;
}

/// Removes its frame when dropped.
pub struct MountedFrame {
    handle: Box<dyn FrameHandle>,
}

impl MountedFrame {
    pub fn new(handle: Box<dyn FrameHandle>) -> Self {
        Self { handle }
    }
}

impl Drop for MountedFrame {
    fn drop(&mut self) {
        self.handle.remove();
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc::{self, UnboundedSender};

    use super::*;

    type Responder = Box<dyn Fn(&Url) -> Vec<WindowMessage> + Send + Sync>;

    #[derive(Debug, Clone)]
    pub struct FrameRecord {
        pub request: FrameRequest,
        pub removed: Arc<AtomicBool>,
    }

    #[derive(Debug, Clone)]
    pub struct PopupRecord {
        pub url: Url,
        pub name: String,
        pub features: String,
    }

    /// Scripted host: replies to frames/popups through `respond_with`.
    pub struct FakeHost {
        location: Mutex<Url>,
        pub isolated: AtomicBool,
        pub crypto: AtomicBool,
        pub popup_blocked: AtomicBool,
        pub popup_closed: Arc<AtomicBool>,
        listeners: Mutex<Vec<UnboundedSender<WindowMessage>>>,
        responder: Mutex<Option<Responder>>,
        frames: Mutex<Vec<FrameRecord>>,
        popups: Mutex<Vec<PopupRecord>>,
        navigations: Mutex<Vec<Url>>,
    }

    impl FakeHost {
        pub fn new(location: &str) -> Self {
            Self {
                location: Mutex::new(Url::parse(location).unwrap()),
                isolated: AtomicBool::new(false),
                crypto: AtomicBool::new(true),
                popup_blocked: AtomicBool::new(false),
                popup_closed: Arc::new(AtomicBool::new(false)),
                listeners: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                frames: Mutex::new(Vec::new()),
                popups: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
            }
        }

        pub fn respond_with<F>(&self, responder: F)
        where
            F: Fn(&Url) -> Vec<WindowMessage> + Send + Sync + 'static,
        {
            *self.responder.lock().unwrap() = Some(Box::new(responder));
        }

        pub fn set_location(&self, location: &str) {
            *self.location.lock().unwrap() = Url::parse(location).unwrap();
        }

        pub fn post_message(&self, message: WindowMessage) {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|tx| tx.send(message.clone()).is_ok());
        }

        pub fn active_listeners(&self) -> usize {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|tx| !tx.is_closed());
            listeners.len()
        }

        pub fn frames(&self) -> Vec<FrameRecord> {
            self.frames.lock().unwrap().clone()
        }

        pub fn popups(&self) -> Vec<PopupRecord> {
            self.popups.lock().unwrap().clone()
        }

        pub fn navigations(&self) -> Vec<Url> {
            self.navigations.lock().unwrap().clone()
        }

        fn reply(&self, url: &Url) {
            let messages = match self.responder.lock().unwrap().as_ref() {
                Some(responder) => responder(url),
                None => Vec::new(),
            };
            for message in messages {
                self.post_message(message);
            }
        }
    }

    /// Value of a query parameter of an authorization URL.
    pub fn query_param(url: &Url, name: &str) -> String {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    }

    pub fn authorization_message(origin: &str, response: serde_json::Value) -> WindowMessage {
        WindowMessage {
            origin: origin.to_owned(),
            data: serde_json::json!({
                "type": "authorization_response",
                "response": response,
            }),
        }
    }

    struct FakeFrame {
        removed: Arc<AtomicBool>,
    }

    impl FrameHandle for FakeFrame {
        fn remove(&mut self) {
            self.removed.store(true, Ordering::SeqCst);
        }
    }

    struct FakePopup {
        closed: Arc<AtomicBool>,
    }

    impl PopupHandle for FakePopup {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl HostEnvironment for FakeHost {
        fn location(&self) -> Url {
            self.location.lock().unwrap().clone()
        }

        fn replace_location(&self, url: &Url) {
            self.navigations.lock().unwrap().push(url.clone());
        }

        fn cross_origin_isolated(&self) -> bool {
            self.isolated.load(Ordering::SeqCst)
        }

        fn secure_crypto_available(&self) -> bool {
            self.crypto.load(Ordering::SeqCst)
        }

        fn listen_messages(&self) -> UnboundedReceiver<WindowMessage> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.listeners.lock().unwrap().push(tx);
            rx
        }

        fn mount_frame(&self, request: FrameRequest) -> Result<Box<dyn FrameHandle>, AuthError> {
            let removed = Arc::new(AtomicBool::new(false));
            let url = request.url.clone();
            self.frames.lock().unwrap().push(FrameRecord {
                request,
                removed: removed.clone(),
            });
            self.reply(&url);
            Ok(Box::new(FakeFrame { removed }))
        }

        fn open_popup(&self, url: &Url, name: &str, features: &str) -> Option<Box<dyn PopupHandle>> {
            if self.popup_blocked.load(Ordering::SeqCst) {
                return None;
            }
            self.popups.lock().unwrap().push(PopupRecord {
                url: url.clone(),
                name: name.to_owned(),
                features: features.to_owned(),
            });
            self.reply(url);
            Some(Box::new(FakePopup {
                closed: self.popup_closed.clone(),
            }))
        }
    }
}
