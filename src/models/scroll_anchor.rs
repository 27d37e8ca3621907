use std::time::{Duration, Instant};

/// Distance from the true bottom, in pixels, still counted as "at bottom".
pub const BOTTOM_SLACK_PX: f32 = 24.0;

/// How long a manual wheel/touch/key gesture suppresses auto-scroll.
pub const USER_GESTURE_WINDOW: Duration = Duration::from_millis(200);

/// Viewport measurements handed in by the rendering glue. The policy below is
/// pure over these numbers; nothing here touches a real viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ViewportMetrics {
    pub fn at_bottom(&self) -> bool {
        self.scroll_height - (self.scroll_top + self.client_height) <= BOTTOM_SLACK_PX
    }
}

/// What the rendering glue should do after a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAction {
    None,
    /// Scroll to the newest message, not animated — has to keep up with
    /// rapid streaming deltas.
    JumpToBottom,
    /// Show the "new message" affordance instead of moving the viewport.
    ShowAffordance,
}

/// Decides, on every timeline mutation, between auto-scroll and the "jump to
/// bottom" affordance — without ever fighting the user's manual scroll.
#[derive(Debug)]
pub struct ScrollAnchor {
    was_at_bottom: bool,
    affordance_visible: bool,
    auto_scrolling: bool,
    last_gesture: Option<Instant>,
    pinned_when_hidden: bool,
}

impl Default for ScrollAnchor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollAnchor {
    /// A freshly opened conversation starts pinned to the newest message.
    pub fn new() -> Self {
        Self {
            was_at_bottom: true,
            affordance_visible: false,
            auto_scrolling: false,
            last_gesture: None,
            pinned_when_hidden: false,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.was_at_bottom
    }

    pub fn affordance_visible(&self) -> bool {
        self.affordance_visible
    }

    pub fn user_interacting(&self, now: Instant) -> bool {
        self.last_gesture
            .is_some_and(|at| now.duration_since(at) < USER_GESTURE_WINDOW)
    }

    /// Sample the viewport before a mutation is applied.
    pub fn sample(&mut self, metrics: &ViewportMetrics) {
        self.was_at_bottom = metrics.at_bottom();
        if self.was_at_bottom {
            self.affordance_visible = false;
        }
    }

    /// A manual scroll gesture. Cancels any in-flight programmatic scroll
    /// immediately and opens the suppression window.
    pub fn on_user_scroll(&mut self, metrics: &ViewportMetrics, now: Instant) {
        self.auto_scrolling = false;
        self.last_gesture = Some(now);
        self.sample(metrics);
    }

    /// New content arrived (message inserted, streaming delta applied).
    pub fn on_new_content(&mut self, now: Instant) -> ScrollAction {
        // Never scroll out from under a user who has already scrolled up.
        if self.affordance_visible {
            return ScrollAction::None;
        }
        if !self.user_interacting(now) && self.was_at_bottom {
            self.auto_scrolling = true;
            return ScrollAction::JumpToBottom;
        }
        self.affordance_visible = true;
        ScrollAction::ShowAffordance
    }

    /// Layout grew without a message event (image decoded, streamed text
    /// wrapped). Fired by the size-change observer.
    pub fn on_layout_growth(&mut self, now: Instant) -> ScrollAction {
        if self.was_at_bottom && !self.affordance_visible && !self.user_interacting(now) {
            self.auto_scrolling = true;
            ScrollAction::JumpToBottom
        } else {
            ScrollAction::None
        }
    }

    /// Restore the visual offset after prepending an older page: shift by the
    /// exact height added above the viewport, no element re-anchoring.
    pub fn adjust_for_prepend(&self, scroll_top_before: f32, height_delta: f32) -> f32 {
        scroll_top_before + height_delta
    }

    /// Tab/visibility change. Returning to the foreground re-pins once if the
    /// tab was backgrounded while pinned.
    pub fn on_visibility_changed(&mut self, hidden: bool) -> ScrollAction {
        if hidden {
            self.pinned_when_hidden = self.was_at_bottom;
            return ScrollAction::None;
        }
        if std::mem::take(&mut self.pinned_when_hidden) {
            self.auto_scrolling = true;
            ScrollAction::JumpToBottom
        } else {
            ScrollAction::None
        }
    }

    /// The user clicked the "new message" affordance.
    pub fn on_affordance_clicked(&mut self) -> ScrollAction {
        self.affordance_visible = false;
        self.auto_scrolling = true;
        ScrollAction::JumpToBottom
    }

    /// The programmatic scroll finished; re-sample where we landed.
    pub fn on_auto_scroll_settled(&mut self, metrics: &ViewportMetrics) {
        self.auto_scrolling = false;
        self.sample(metrics);
    }

    pub fn is_auto_scrolling(&self) -> bool {
        self.auto_scrolling
    }
}
