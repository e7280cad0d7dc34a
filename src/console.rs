//! Operator view: bounded log rings and a columnar text renderer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

pub const LOG_DEPTH: usize = 25;
pub const LOG_WIDTH: usize = 80;

/// Fixed-depth line buffer. Oldest line goes first once full; long lines are cut.
#[derive(Debug, Clone)]
pub struct LogRing {
    depth: usize,
    width: usize,
    lines: VecDeque<String>,
}

impl LogRing {
    pub fn new(depth: usize, width: usize) -> Self {
        Self {
            depth,
            width,
            lines: VecDeque::with_capacity(depth),
        }
    }

    pub fn append(&mut self, line: &str) {
        if self.depth == 0 {
            return;
        }
        if self.lines.len() == self.depth {
            self.lines.pop_front();
        }
        self.lines.push_back(line.chars().take(self.width).collect());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_DEPTH, LOG_WIDTH)
    }
}

pub trait Renderer {
    /// Place `text` in column `col` (0-based) at `row`.
    fn print_col(&mut self, col: usize, row: usize, text: &str);
    fn present(&mut self);
}

pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn print_col(&mut self, _: usize, _: usize, _: &str) {}
    fn present(&mut self) {}
}

/// Fixed-width columns separated by `|`, written to stderr.
pub struct TextGrid {
    cols: usize,
    col_width: usize,
    rows: Vec<Vec<String>>,
}

impl TextGrid {
    pub fn new(cols: usize, col_width: usize) -> Self {
        Self {
            cols,
            col_width: col_width.max(4),
            rows: Vec::new(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let w = self.col_width - 2;
        self.rows
            .iter()
            .map(|row| {
                let mut line = String::new();
                for cell in row {
                    line.push_str(&format!("{:<w$}| ", cell, w = w));
                }
                line.trim_end().to_string()
            })
            .collect()
    }
}

impl Renderer for TextGrid {
    fn print_col(&mut self, col: usize, row: usize, text: &str) {
        if col >= self.cols {
            return;
        }
        while self.rows.len() <= row {
            self.rows.push(vec![String::new(); self.cols]);
        }
        self.rows[row][col] = text.chars().take(self.col_width - 3).collect();
    }

    fn present(&mut self) {
        for line in self.lines() {
            eprintln!("{}", line);
        }
        eprintln!();
        self.rows.clear();
    }
}

/// Status lines produced by a run: logged, kept in rings, optionally rendered.
pub struct Console {
    pub system: LogRing,
    pub results: LogRing,
    pub bus: LogRing,
    renderer: Box<dyn Renderer>,
    interval: Duration,
    last: Instant,
}

impl Console {
    pub fn new(renderer: Box<dyn Renderer>, interval: Duration) -> Self {
        Self {
            system: LogRing::default(),
            results: LogRing::default(),
            bus: LogRing::default(),
            renderer,
            interval,
            last: Instant::now(),
        }
    }

    pub fn quiet() -> Self {
        Self::new(Box::new(NullRenderer), Duration::from_secs(1))
    }

    pub fn system(&mut self, line: String) {
        info!("{}", line);
        self.system.append(&line);
    }

    pub fn warn(&mut self, line: String) {
        warn!("{}", line);
        self.system.append(&line);
    }

    pub fn result(&mut self, line: String) {
        info!("{}", line);
        self.results.append(&line);
    }

    pub fn bus(&mut self, line: String) {
        debug!("{}", line);
        self.bus.append(&line);
    }

    pub fn maybe_render(&mut self) {
        if self.last.elapsed() >= self.interval {
            self.render();
            self.last = Instant::now();
        }
    }

    pub fn render(&mut self) {
        for (col, ring) in [&self.system, &self.results, &self.bus].into_iter().enumerate() {
            for (row, line) in ring.lines().enumerate() {
                self.renderer.print_col(col, row, line);
            }
        }
        self.renderer.present();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ring_drops_oldest_and_truncates() {
        let mut r = LogRing::new(3, 5);
        for l in ["one", "two", "three", "four"] {
            r.append(l);
        }
        assert_eq!(r.lines().collect::<Vec<_>>(), vec!["two", "three", "four"]);
        r.append("much too long");
        assert_eq!(r.lines().last(), Some("much "));
        assert_eq!(r.lines().count(), 3);
    }

    #[test]
    fn grid_cuts_cells_and_ignores_extra_columns() {
        let mut g = TextGrid::new(2, 8);
        g.print_col(0, 0, "abcdefghij");
        g.print_col(1, 1, "x");
        g.print_col(2, 0, "nope");
        assert_eq!(g.lines(), vec!["abcde |       |".to_string(), "      | x     |".to_string()]);
    }

    #[derive(Default)]
    struct Capture {
        cells: Rc<RefCell<Vec<(usize, usize, String)>>>,
        presented: Rc<RefCell<usize>>,
    }

    impl Renderer for Capture {
        fn print_col(&mut self, col: usize, row: usize, text: &str) {
            self.cells.borrow_mut().push((col, row, text.to_string()));
        }
        fn present(&mut self) {
            *self.presented.borrow_mut() += 1;
        }
    }

    #[test]
    fn console_renders_three_columns() {
        let cap = Capture::default();
        let (cells, presented) = (cap.cells.clone(), cap.presented.clone());
        let mut c = Console::new(Box::new(cap), Duration::ZERO);
        c.system("sys".into());
        c.result("res".into());
        c.bus("bus".into());
        c.bus("bus2".into());
        c.maybe_render();
        assert_eq!(*presented.borrow(), 1);
        assert_eq!(
            *cells.borrow(),
            vec![
                (0, 0, "sys".to_string()),
                (1, 0, "res".to_string()),
                (2, 0, "bus".to_string()),
                (2, 1, "bus2".to_string()),
            ]
        );
    }
}
