//! Scrolling text monitor.
//!
//! Messages are queued FIFO and typed onto a fixed-height surface one
//! character at a time by a single consumer task. Text is bottom-anchored:
//! each new line scrolls the surface up by one. When more messages arrive
//! while one is being typed, the rest of the current message is written
//! instantly, so characters of two messages never interleave on a line.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const MONITOR_WIDTH: usize = 80;
pub const VISIBLE_LINES: usize = 13;
pub const CHAR_DELAY: Duration = Duration::from_millis(30);

#[derive(Default)]
struct Inbox {
    queue: VecDeque<String>,
    /// Total messages ever queued.
    arrivals: u64,
}

struct Shared {
    inbox: Mutex<Inbox>,
    notify: Notify,
    displaying: AtomicBool,
    lines: watch::Sender<Vec<String>>,
}

/// Producer side of the monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    /// Queues a message. Empty messages are refused.
    pub fn queue(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        {
            let mut inbox = self.shared.inbox.lock();
            inbox.queue.push_back(text.to_string());
            inbox.arrivals += 1;
        }
        self.shared.notify.notify_one();
        true
    }

    /// Snapshot of the surface, top line first.
    pub fn lines(&self) -> Vec<String> {
        self.shared.lines.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.shared.lines.subscribe()
    }

    pub fn is_displaying(&self) -> bool {
        self.shared.displaying.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.shared.inbox.lock().queue.len()
    }
}

/// Starts the consumer task.
pub fn spawn_monitor(shutdown: CancellationToken) -> (MonitorHandle, JoinHandle<()>) {
    let (lines, _) = watch::channel(vec![String::new(); VISIBLE_LINES]);
    let shared = Arc::new(Shared {
        inbox: Mutex::new(Inbox::default()),
        notify: Notify::new(),
        displaying: AtomicBool::new(false),
        lines,
    });
    let task = tokio::spawn(run_monitor(shared.clone(), shutdown));
    (MonitorHandle { shared }, task)
}

async fn run_monitor(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut surface: VecDeque<String> = std::iter::repeat(String::new())
        .take(VISIBLE_LINES)
        .collect();

    loop {
        let next = {
            let mut inbox = shared.inbox.lock();
            inbox.queue.pop_front().map(|text| (text, inbox.arrivals))
        };
        let Some((text, arrivals_at_start)) = next else {
            shared.displaying.store(false, Ordering::Release);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = shared.notify.notified() => {}
            }
            continue;
        };
        shared.displaying.store(true, Ordering::Release);
        let rushed = || shared.inbox.lock().arrivals > arrivals_at_start;

        for line in wrap(&text, MONITOR_WIDTH) {
            surface.pop_front();
            surface.push_back(String::new());

            if rushed() {
                set_bottom(&shared, &mut surface, &line);
                continue;
            }

            let mut typed = String::with_capacity(line.len());
            for ch in line.chars() {
                typed.push(ch);
                set_bottom(&shared, &mut surface, &typed);
                if rushed() {
                    set_bottom(&shared, &mut surface, &line);
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        shared.displaying.store(false, Ordering::Release);
                        return;
                    }
                    _ = tokio::time::sleep(CHAR_DELAY) => {}
                }
            }
            if line.is_empty() {
                set_bottom(&shared, &mut surface, "");
            }
        }
    }
    shared.displaying.store(false, Ordering::Release);
    debug!("monitor stopped");
}

fn set_bottom(shared: &Shared, surface: &mut VecDeque<String>, text: &str) {
    if let Some(bottom) = surface.back_mut() {
        bottom.clear();
        bottom.push_str(text);
    }
    shared.lines.send_replace(surface.iter().cloned().collect());
}

/// Wraps text into lines of at most `width` characters. Words are kept
/// whole where they fit; longer words are split. Explicit line breaks are
/// honoured and trailing whitespace is dropped.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();

    for paragraph in normalized.trim_end_matches('\n').split('\n') {
        let first_line = lines.len();
        let mut current = String::new();
        let mut current_len = 0;
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            let needed = if current_len == 0 { word_len } else { word_len + 1 };
            if current_len + needed <= width {
                if current_len > 0 {
                    current.push(' ');
                }
                current.push_str(word);
                current_len += needed;
                continue;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(width).peekable();
            while let Some(chunk) = chunks.next() {
                if chunks.peek().is_some() || chunk.len() == width {
                    lines.push(chunk.iter().collect());
                } else {
                    current = chunk.iter().collect();
                    current_len = chunk.len();
                }
            }
        }
        // Blank paragraphs still occupy a line.
        if current_len > 0 || lines.len() == first_line {
            lines.push(current);
        }
    }
    lines
}
