//! Terminal rendering of status and the spectrum.

use vocalcv_core::{playback::tap::AnalysisTap, SessionState, SessionStatusEvent, VisualFrame, Visualizer};

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Height of the visualizer canvas. Bars are at most 127.5 tall.
pub const CANVAS_HEIGHT: f32 = 128.0;

/// Caption shown under the connect button.
pub fn status_caption(status: &SessionStatusEvent) -> &'static str {
    match (status.state, status.is_talking) {
        (_, true) => "Agent Speaking...",
        (SessionState::Connected, false) => "Listening...",
        (SessionState::Connecting, false) => "Connecting...",
        _ => "Ready to connect",
    }
}

pub fn status_line(status: &SessionStatusEvent) -> String {
    let state = match status.state {
        SessionState::Disconnected => "disconnected",
        SessionState::Connecting => "connecting",
        SessionState::Connected => "connected",
        SessionState::Error => "error",
    };
    match &status.error {
        Some(err) => format!("[{state}] {} ({err})", status_caption(status)),
        None => format!("[{state}] {}", status_caption(status)),
    }
}

/// One character per bar, taller bars use fuller blocks.
pub fn spectrum_line(frame: &VisualFrame) -> String {
    match frame {
        VisualFrame::Idle { .. } => "─".repeat(32),
        VisualFrame::Bars(bars) => bars
            .iter()
            .map(|bar| {
                let level = (bar.height / CANVAS_HEIGHT * LEVELS.len() as f32) as usize;
                if bar.height <= 0.0 {
                    ' '
                } else {
                    LEVELS[level.min(LEVELS.len() - 1)]
                }
            })
            .collect(),
    }
}

/// One redraw. Bars while connected, the idle line otherwise.
pub fn spectrum_tick(visualizer: &mut Visualizer, tap: &AnalysisTap, state: SessionState) -> String {
    let frame = visualizer.render(tap, state == SessionState::Connected);
    spectrum_line(&frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocalcv_core::visualizer::{Bar, Rgb, DEFAULT_FFT_SIZE};

    fn bar(height: f32) -> Bar {
        Bar {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height,
            color: Rgb(0, 0, 50),
        }
    }

    #[test]
    fn talking_caption_wins() {
        let status = SessionStatusEvent {
            state: SessionState::Connected,
            is_talking: true,
            error: None,
        };
        assert_eq!(status_caption(&status), "Agent Speaking...");
        assert_eq!(status_line(&status), "[connected] Agent Speaking...");
    }

    #[test]
    fn error_is_shown() {
        let status = SessionStatusEvent {
            state: SessionState::Error,
            is_talking: false,
            error: Some("Connection error occurred.".into()),
        };
        assert_eq!(
            status_line(&status),
            "[error] Ready to connect (Connection error occurred.)"
        );
    }

    #[test]
    fn bars_map_to_levels() {
        let line = spectrum_line(&VisualFrame::Bars(vec![bar(0.0), bar(10.0), bar(127.5)]));
        assert_eq!(line, " ▁█");
    }

    #[test]
    fn idle_line_is_drawn_while_not_connected() {
        let tap = AnalysisTap::default();
        tap.push(&vec![0.5; DEFAULT_FFT_SIZE]);
        let mut visualizer = Visualizer::new(DEFAULT_FFT_SIZE, 128.0, CANVAS_HEIGHT);
        for state in [SessionState::Disconnected, SessionState::Connecting, SessionState::Error] {
            assert_eq!(spectrum_tick(&mut visualizer, &tap, state), "─".repeat(32));
        }
        let live = spectrum_tick(&mut visualizer, &tap, SessionState::Connected);
        assert!(!live.contains('─'));
    }
}
