// src/dashboard.rs
//! Paged browsing of a captured sensor recording.
//!
//! All navigation goes through [`reduce`], a pure function from the current
//! state and one event to the next state plus the view to show.

use crate::windowing::{DerivedMetrics, Sample};

pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageState {
    pub page: usize,
    pub page_size: usize,
    /// Axis indices to show; empty means all.
    pub axes: Vec<usize>,
    pub total: usize,
}

impl PageState {
    pub fn new(total: usize) -> Self {
        Self {
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            axes: Vec::new(),
            total,
        }
    }

    pub fn max_page(&self) -> usize {
        self.total.div_ceil(self.page_size).saturating_sub(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEvent {
    Next,
    Prev,
    Goto(usize),
    SetPageSize(usize),
    SelectAxes(Vec<usize>),
    /// The recording was reloaded and now holds this many samples.
    Reload(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageView {
    pub page: usize,
    pub max_page: usize,
    pub start: usize,
    pub end: usize,
    pub info: String,
}

pub fn reduce(state: &PageState, event: PageEvent) -> (PageState, PageView) {
    let mut next = state.clone();
    match event {
        PageEvent::Next => next.page += 1,
        PageEvent::Prev => next.page = next.page.saturating_sub(1),
        PageEvent::Goto(page) => next.page = page,
        PageEvent::SetPageSize(size) if size > 0 => next.page_size = size,
        PageEvent::SetPageSize(_) => {}
        PageEvent::SelectAxes(axes) => next.axes = axes,
        PageEvent::Reload(total) => next.total = total,
    }
    next.page = next.page.min(next.max_page());
    let view = view_of(&next);
    (next, view)
}

pub fn view_of(state: &PageState) -> PageView {
    let start = (state.page * state.page_size).min(state.total);
    let end = (start + state.page_size).min(state.total);
    PageView {
        page: state.page,
        max_page: state.max_page(),
        start,
        end,
        info: format!(
            "Page {} / {} | showing {} of {} samples (page size = {})",
            state.page,
            state.max_page(),
            end - start,
            state.total,
            state.page_size
        ),
    }
}

/// Samples of the current page restricted to the selected axes.
pub fn page_samples(samples: &[Sample], state: &PageState, view: &PageView) -> Vec<Sample> {
    let end = view.end.min(samples.len());
    let start = view.start.min(end);
    samples[start..end]
        .iter()
        .map(|s| {
            if state.axes.is_empty() {
                return s.clone();
            }
            let axes = state
                .axes
                .iter()
                .filter_map(|&i| s.axes().get(i).copied())
                .collect();
            let picked = Sample::new(s.timestamp(), axes);
            match s.label() {
                Some(label) => picked.with_label(label),
                None => picked,
            }
        })
        .collect()
}

/// Text table of count/mean/std/min/max per axis for one page.
pub fn summary_table(metrics: &DerivedMetrics, axis_names: &[String]) -> String {
    let Some(axes) = &metrics.per_axis else {
        return format!("count {}: no data to summarize\n", metrics.count);
    };
    let mut out = format!("{:<6}", "stat");
    for idx in 0..axes.len() {
        let name = axis_names.get(idx).map(String::as_str).unwrap_or("?");
        out.push_str(&format!("{name:>12}"));
    }
    out.push('\n');
    out.push_str(&format!("{:<6}", "count"));
    for _ in axes {
        out.push_str(&format!("{:>12}", metrics.count));
    }
    out.push('\n');
    let rows = [
        ("mean", axes.iter().map(|a| a.mean).collect::<Vec<f64>>()),
        ("std", axes.iter().map(|a| a.std).collect()),
        ("min", axes.iter().map(|a| a.min).collect()),
        ("max", axes.iter().map(|a| a.max).collect()),
    ];
    for (label, values) in rows {
        out.push_str(&format!("{label:<6}"));
        for value in values {
            out.push_str(&format!("{value:>12.3}"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_is_clamped_to_available_pages() {
        let state = PageState::new(1200);
        assert_eq!(state.max_page(), 2);

        let (state, view) = reduce(&state, PageEvent::Prev);
        assert_eq!(view.page, 0);
        let (state, _) = reduce(&state, PageEvent::Next);
        let (state, _) = reduce(&state, PageEvent::Next);
        let (state, view) = reduce(&state, PageEvent::Next);
        assert_eq!(state.page, 2);
        assert_eq!((view.start, view.end), (1000, 1200));
        assert_eq!(
            view.info,
            "Page 2 / 2 | showing 200 of 1200 samples (page size = 500)"
        );

        let (_, view) = reduce(&state, PageEvent::Goto(99));
        assert_eq!(view.page, 2);
    }

    #[test]
    fn page_size_changes_reclamp_the_page() {
        let state = PageState {
            page: 5,
            page_size: 100,
            axes: Vec::new(),
            total: 600,
        };
        let (state, view) = reduce(&state, PageEvent::SetPageSize(250));
        assert_eq!(state.page, 2);
        assert_eq!((view.start, view.end), (500, 600));
        let (same, _) = reduce(&state, PageEvent::SetPageSize(0));
        assert_eq!(same.page_size, 250);
    }

    #[test]
    fn empty_recording_has_a_single_empty_page() {
        let (state, view) = reduce(&PageState::new(0), PageEvent::Next);
        assert_eq!(state.page, 0);
        assert_eq!((view.start, view.end, view.max_page), (0, 0, 0));
        let (state, view) = reduce(&state, PageEvent::Reload(10));
        assert_eq!(state.total, 10);
        assert_eq!(view.end, 10);
    }

    #[test]
    fn page_samples_pick_selected_axes() {
        let samples: Vec<Sample> = (0..5)
            .map(|i| Sample::now(vec![i as f64, 10.0 + i as f64, 20.0 + i as f64]).with_label("jog"))
            .collect();
        let state = PageState {
            page: 1,
            page_size: 2,
            axes: vec![2, 0],
            total: samples.len(),
        };
        let view = view_of(&state);
        let page = page_samples(&samples, &state, &view);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].axes(), [22.0, 2.0]);
        assert_eq!(page[1].label(), Some("jog"));

        let table = summary_table(&DerivedMetrics::compute(&page), &["z".into(), "x".into()]);
        assert!(table.contains("mean"));
        assert!(table.lines().nth(2).unwrap().contains("22.500"));
    }
}
