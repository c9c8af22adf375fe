//! Overlay content rasterized into the inset texture on every tick

use super::gpu::Canvas;
use crate::types::{Rect, Rgba};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Something that can paint itself onto a canvas within its bounds
pub trait Drawable: Send + Sync {
    fn set_bounds(&self, bounds: Rect);

    fn bounds(&self) -> Rect;

    fn draw(&self, canvas: &mut dyn Canvas);
}

/// Pixels the ball travels per step
pub const BALL_STEP_PX: f32 = 4.0;
/// Time between steps
pub const BALL_STEP_INTERVAL: Duration = Duration::from_millis(60);
/// Ball radius as a fraction of the bounds width
pub const BALL_RADIUS_FRACTION: f32 = 0.1;

#[derive(Debug)]
struct BallState {
    bounds: Rect,
    x: f32,
    direction: f32,
    last_step: Option<Instant>,
}

/// Red ball bouncing left and right across a green field.
///
/// The ball advances one step per elapsed interval, measured from the
/// previous draw, so its speed does not depend on the tick rate.
#[derive(Debug)]
pub struct BouncingBall {
    state: Mutex<BallState>,
}

impl Default for BouncingBall {
    fn default() -> Self {
        Self::new()
    }
}

impl BouncingBall {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BallState {
                bounds: Rect::default(),
                x: 0.0,
                direction: 1.0,
                last_step: None,
            }),
        }
    }

    /// Current ball centre relative to the bounds origin
    pub fn position(&self) -> (f32, f32) {
        let state = self.lock();
        (state.x, ball_y(&state))
    }

    /// Advance the ball by `steps` steps, bouncing off the horizontal edges
    pub fn advance(&self, steps: u32) {
        let mut state = self.lock();
        step(&mut state, steps);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ball_y(state: &BallState) -> f32 {
    let width = state.bounds.width() as f32;
    let height = state.bounds.height() as f32;
    if width <= 0.0 || height <= 0.0 {
        return 0.0;
    }
    state.x / (width / height)
}

fn step(state: &mut BallState, steps: u32) {
    let width = state.bounds.width() as f32;
    if width <= 0.0 {
        return;
    }
    for _ in 0..steps {
        state.x += BALL_STEP_PX * state.direction;
        if state.x >= width {
            state.x = width;
            state.direction = -1.0;
        } else if state.x <= 0.0 {
            state.x = 0.0;
            state.direction = 1.0;
        }
    }
}

impl Drawable for BouncingBall {
    fn set_bounds(&self, bounds: Rect) {
        let mut state = self.lock();
        state.bounds = bounds;
        state.x = state.x.clamp(0.0, bounds.width().max(0) as f32);
    }

    fn bounds(&self) -> Rect {
        self.lock().bounds
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        let mut state = self.lock();

        let now = Instant::now();
        match state.last_step {
            Some(last) => {
                let elapsed = now.duration_since(last);
                let steps = (elapsed.as_millis() / BALL_STEP_INTERVAL.as_millis()) as u32;
                if steps > 0 {
                    step(&mut state, steps);
                    state.last_step = Some(last + BALL_STEP_INTERVAL * steps);
                }
            }
            None => state.last_step = Some(now),
        }

        let bounds = state.bounds;
        canvas.fill_rect(bounds, Rgba::GREEN);

        let radius = BALL_RADIUS_FRACTION * bounds.width() as f32;
        canvas.fill_circle(
            bounds.left as f32 + state.x,
            bounds.top as f32 + ball_y(&state),
            radius,
            Rgba::RED,
        );
    }
}
