//! Mock live trace: a synthetic sine that scrolls on a fixed timestep.
//!
//! The canvas spans `x` in `[-SIZE_X, SIZE_X)` and `y` in `[-SIZE_Y, SIZE_Y]`.
//! Wall time fed to [`Renderer::advance`] is only ever consumed in whole
//! steps, so the animation speed does not depend on how often frames are drawn.

use std::f64::consts::PI;
use std::time::Duration;

pub const SIZE_X:i32 = 200;
pub const SIZE_Y:i32 = 100;
pub const AMPLITUDE:f64 = (SIZE_Y / 2) as f64;
pub const FREQUENCY:f64 = 0.1;
pub const PHASE_SHIFT_SPEED:f64 = 0.1;
pub const FRAME_INTERVAL:Duration = Duration::from_millis(100);

// "All channels" draws this many traces, each smaller and faster than the last
pub const DISPLAY_CHANNELS:u8 = 3;
const AMPLITUDE_STEP:f64 = 10.0;
const FREQUENCY_STEP:f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum View {
    Channel(u8),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub channel: u8,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub phase: f64,
    pub x_axis: ((f64, f64), (f64, f64)),
    pub y_axis: ((f64, f64), (f64, f64)),
    pub traces: Vec<Polyline>,
}

#[derive(Debug, Clone)]
pub struct Renderer {
    view: View,
    offset: f64,
    step: Duration,
    phase: f64,
    accumulator: Duration,
    steps: u64,
}

/// One sweep across the canvas.
pub fn trace(amplitude:f64, frequency:f64, phase:f64, offset:f64) -> Vec<(f64, f64)> {
    (-SIZE_X..SIZE_X)
        .map(|x| {
            let y = amplitude * (frequency * (x as f64 * 2.0 * PI / SIZE_X as f64) + phase).sin();
            (x as f64, y + offset)
        })
        .collect()
}

impl Renderer {

    pub fn new(view:View) -> Self {
        Self { view, offset: 0.0, step: FRAME_INTERVAL, phase: 0.0, accumulator: Duration::ZERO, steps: 0 }
    }

    /// Vertical offset, clamped to the canvas.
    pub fn with_offset(mut self, offset:f64) -> Self {
        self.offset = offset.max(-SIZE_Y as f64).min(SIZE_Y as f64);
        self
    }

    pub fn with_step(mut self, step:Duration) -> Self {
        if step > Duration::ZERO { self.step = step; }
        self
    }

    pub fn set_view(&mut self, view:View) { self.view = view; }

    pub fn view(&self) -> View { self.view }
    pub fn phase(&self) -> f64 { self.phase }
    pub fn steps(&self) -> u64 { self.steps }
    pub fn step(&self) -> Duration { self.step }

    /// Banks `elapsed` and applies as many whole steps as it covers; returns how many.
    pub fn advance(&mut self, elapsed:Duration) -> u32 {
        self.accumulator += elapsed;

        let mut n:u32 = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            self.phase += PHASE_SHIFT_SPEED;
            self.steps += 1;
            n += 1;
        }
        n
    }

    pub fn frame(&self) -> Frame {
        let traces = match self.view {
            View::Channel(channel) => vec![Polyline { channel, points: trace(AMPLITUDE, FREQUENCY, self.phase, self.offset) }],
            View::All => {
                let mut amplitude = AMPLITUDE;
                let mut frequency = FREQUENCY;
                let mut ans:Vec<Polyline> = vec![];
                for channel in 1..=DISPLAY_CHANNELS {
                    ans.push(Polyline { channel, points: trace(amplitude, frequency, self.phase, self.offset) });
                    amplitude -= AMPLITUDE_STEP;
                    frequency += FREQUENCY_STEP;
                }
                ans
            }
        };

        Frame {
            phase: self.phase,
            x_axis: ((-SIZE_X as f64, 0.0), (SIZE_X as f64, 0.0)),
            y_axis: ((0.0, -SIZE_Y as f64), (0.0, SIZE_Y as f64)),
            traces,
        }
    }

}

fn to_cell(x:f64, y:f64, cols:usize, rows:usize) -> (usize, usize) {
    let span_x = (2 * SIZE_X) as f64;
    let span_y = (2 * SIZE_Y) as f64;
    let col = ((x + SIZE_X as f64) / span_x * cols as f64).floor().max(0.0) as usize;
    let row = ((SIZE_Y as f64 - y) / span_y * (rows - 1) as f64).round().max(0.0) as usize;
    (col.min(cols - 1), row.min(rows - 1))
}

/// Renders a frame into `rows` lines of `cols` characters.
pub fn rasterize(frame:&Frame, cols:usize, rows:usize) -> Vec<String> {
    if cols == 0 || rows == 0 { return vec![]; }

    let mut grid = vec![vec![' '; cols]; rows];

    let (_, axis_row) = to_cell(0.0, frame.x_axis.0 .1, cols, rows);
    let (axis_col, _) = to_cell(frame.y_axis.0 .0, 0.0, cols, rows);
    for c in grid[axis_row].iter_mut() { *c = '-'; }
    for line in grid.iter_mut() { line[axis_col] = '|'; }

    const MARKS:[char; 3] = ['*', 'o', '#'];
    for (i, poly) in frame.traces.iter().enumerate() {
        let mark = MARKS[i % MARKS.len()];
        let mut prev:Option<(usize, usize)> = None;
        for (x, y) in &poly.points {
            let (col, row) = to_cell(*x, *y, cols, rows);

            // Fill the vertical gap to the previous point so steep edges stay connected
            let (lo, hi) = match prev {
                Some((pc, pr)) if pc + 1 >= col => (pr.min(row), pr.max(row)),
                _ => (row, row),
            };
            for line in grid.iter_mut().take(hi + 1).skip(lo) {
                line[col] = mark;
            }
            prev = Some((col, row));
        }
    }

    // Every trace crosses the origin at phase 0; keep it marked
    grid[axis_row][axis_col] = '+';

    grid.into_iter().map(|line| line.into_iter().collect()).collect()
}
