//! Terminal front-end: reads commands from stdin, prints snapshot changes to
//! stdout. Logs go to stderr.

use crate::audio::CaptureStatus;
use crate::dispatch::CaptureMode;
use crate::session::{CompletionReason, SessionController, SessionPhase, SessionSnapshot, UserAction};
use crate::timer::TimeLevel;
use std::io::BufRead;
use std::thread;
use tokio::sync::{mpsc, watch};

const HELP: &str = "Commands: /play /stop /rec /done /listen /reset /submit /finish /ok /clear. \
Choose an option by number; any other line is added to your answer.";

/// Run one section against the terminal until it completes.
pub async fn drive(mut controller: SessionController) -> CompletionReason {
    let (tx, rx) = mpsc::channel(32);
    spawn_stdin_reader(controller.subscribe(), tx);
    let printer = tokio::spawn(print_snapshots(controller.subscribe()));

    let reason = controller.run(rx).await;

    drop(controller);
    if let Err(e) = printer.await {
        tracing::debug!("Snapshot printer ended abnormally: {}", e);
    }
    reason
}

fn spawn_stdin_reader(snapshots: watch::Receiver<SessionSnapshot>, tx: mpsc::Sender<UserAction>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let snapshot = snapshots.borrow().clone();
            match parse_line(&line, &snapshot) {
                Some(action) => {
                    if tx.blocking_send(action).is_err() {
                        break;
                    }
                }
                None if !line.trim().is_empty() => println!("{}", HELP),
                None => {}
            }
        }
        tracing::debug!("stdin closed");
    });
}

async fn print_snapshots(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut previous: Option<SessionSnapshot> = None;
    loop {
        let next = snapshots.borrow_and_update().clone();
        for line in render(previous.as_ref(), &next) {
            println!("{}", line);
        }
        previous = Some(next);
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

/// Turn one input line into an action, given what is on screen.
pub fn parse_line(line: &str, snapshot: &SessionSnapshot) -> Option<UserAction> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(command) = trimmed.strip_prefix('/') {
        return match command.trim().to_lowercase().as_str() {
            "play" => Some(UserAction::PlayAudio),
            "stop" => Some(UserAction::StopAudio),
            "rec" | "record" => Some(UserAction::StartRecording),
            "done" => Some(UserAction::StopRecording),
            "listen" => Some(UserAction::ReviewRecording),
            "reset" | "retry" => Some(UserAction::ResetRecording),
            "submit" => Some(UserAction::Submit),
            "finish" => Some(UserAction::Finish),
            "ok" => Some(UserAction::DismissNotice),
            "clear" => Some(UserAction::EditText(String::new())),
            _ => None,
        };
    }

    match snapshot.capture_mode? {
        CaptureMode::SingleChoice => {
            let options = &snapshot.question.as_ref()?.options;
            let by_number = trimmed
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| options.get(i));
            let by_value = options
                .iter()
                .find(|o| o.value.eq_ignore_ascii_case(trimmed) || o.label.eq_ignore_ascii_case(trimmed));
            by_number
                .or(by_value)
                .map(|o| UserAction::Select(o.value.clone()))
        }
        CaptureMode::FreeText | CaptureMode::Dictation | CaptureMode::Essay { .. } => {
            let existing = snapshot
                .draft
                .as_ref()
                .map(|d| d.text.as_str())
                .unwrap_or_default();
            let text = if existing.is_empty() {
                line.to_string()
            } else {
                format!("{}\n{}", existing, line)
            };
            Some(UserAction::EditText(text))
        }
        CaptureMode::SpokenResponse => None,
    }
}

pub fn format_remaining(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Lines describing what changed between two snapshots.
pub fn render(previous: Option<&SessionSnapshot>, next: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    let changed = |f: &dyn Fn(&SessionSnapshot) -> String| -> bool {
        previous.map(|p| f(p) != f(next)).unwrap_or(true)
    };

    if next.question_id().is_some() && previous.and_then(|p| p.question_id()) != next.question_id() {
        lines.extend(render_question(next));
    }

    if let Some(progress) = &next.progress {
        if previous.map(|p| p.progress.as_ref() != Some(progress)).unwrap_or(true) {
            let level = progress.current_level.as_deref().unwrap_or("-");
            lines.push(format!(
                "Progress: {}/{} (level {})",
                progress.answered, progress.total, level
            ));
        }
    }

    if let Some(remaining) = next.remaining_secs {
        let level_changed = previous.map(|p| p.time_level != next.time_level).unwrap_or(true);
        let minute_mark = remaining % 60 == 0
            && previous.and_then(|p| p.remaining_secs) != Some(remaining);
        if level_changed || (minute_mark && remaining > 0) {
            let suffix = match next.time_level {
                TimeLevel::Normal => "",
                TimeLevel::Warning => " (hurry up)",
                TimeLevel::Critical => " (almost out of time)",
                TimeLevel::Expired => " (time is up)",
            };
            lines.push(format!("Time left: {}{}", format_remaining(remaining), suffix));
        }
    }

    if let Some(capture) = &next.capture {
        if changed(&|s| format!("{:?}", s.capture.as_ref().map(|c| c.status))) {
            lines.push(match capture.status {
                CaptureStatus::Idle => format!(
                    "Ready to record ({} of {} attempts left). /rec to start",
                    capture.remaining_attempts, capture.max_attempts
                ),
                CaptureStatus::RequestingPermission => "Waiting for the microphone...".to_string(),
                CaptureStatus::Recording => "Recording... /done to stop".to_string(),
                CaptureStatus::Stopped => format!(
                    "Recorded {}s. /listen to hear it, /submit to send, /reset to try again",
                    capture.elapsed_secs
                ),
                CaptureStatus::Submitted => "Recording sent.".to_string(),
                CaptureStatus::Error => capture
                    .error
                    .clone()
                    .unwrap_or_else(|| "The microphone failed.".to_string()),
            });
        }
    }

    if let Some(playback) = &next.playback {
        if changed(&|s| format!("{:?}", s.playback.as_ref().map(|p| (p.plays_remaining, p.playing, p.available)))) {
            if !playback.available {
                lines.push("Audio is unavailable for this question.".to_string());
            } else if playback.playing {
                lines.push("Playing...".to_string());
            } else {
                lines.push(format!("Plays remaining: {}", playback.plays_remaining));
            }
        }
    }

    if let Some(feedback) = &next.feedback {
        if previous.map(|p| p.feedback.is_none()).unwrap_or(true) {
            if feedback.is_correct {
                lines.push("Correct!".to_string());
            } else {
                let answer = feedback.correct_answer.as_deref().unwrap_or("-");
                lines.push(format!("Incorrect. The answer was: {}", answer));
            }
        }
    }

    if let Some(notice) = &next.notice {
        if previous.map(|p| p.notice.as_ref() != Some(notice)).unwrap_or(true) {
            lines.push(format!("! {}", notice));
        }
    }

    if previous.map(|p| p.phase != next.phase).unwrap_or(true) {
        match next.phase {
            SessionPhase::Loading => lines.push("Loading...".to_string()),
            SessionPhase::Submitting => lines.push("Submitting...".to_string()),
            SessionPhase::Complete(reason) => lines.push(completion_line(reason)),
            SessionPhase::Error => lines.push("The section stopped. /finish to close it.".to_string()),
            SessionPhase::Active | SessionPhase::Feedback => {}
        }
    }

    lines
}

fn completion_line(reason: CompletionReason) -> String {
    let detail = match reason {
        CompletionReason::Exhausted | CompletionReason::AutoCompleted => "all questions answered",
        CompletionReason::Finished => "finished early",
        CompletionReason::Expired => "time is up",
    };
    format!("Section complete ({}). Thank you.", detail)
}

fn render_question(snapshot: &SessionSnapshot) -> Vec<String> {
    let Some(question) = &snapshot.question else {
        return Vec::new();
    };
    let mut lines = vec![String::new(), format!("--- Question {} ---", question.id)];
    if let Some(passage) = &question.passage {
        lines.push(passage.clone());
        lines.push(String::new());
    }
    if let Some(prompt) = &question.prompt {
        lines.push(prompt.clone());
    }
    for (i, option) in question.options.iter().enumerate() {
        lines.push(format!("  {}. {}", i + 1, option.label));
    }
    match snapshot.capture_mode {
        Some(CaptureMode::Essay {
            min_words,
            max_words,
        }) => {
            let bounds = match (min_words, max_words) {
                (Some(min), Some(max)) => format!("{}-{} words", min, max),
                (Some(min), None) => format!("at least {} words", min),
                (None, Some(max)) => format!("at most {} words", max),
                (None, None) => "any length".to_string(),
            };
            lines.push(format!("Write your answer ({}), then /submit", bounds));
        }
        Some(CaptureMode::FreeText) | Some(CaptureMode::Dictation) => {
            lines.push("Type your answer, then /submit".to_string())
        }
        Some(CaptureMode::SingleChoice) => lines.push("Choose a number, then /submit".to_string()),
        Some(CaptureMode::SpokenResponse) | None => {}
    }
    if snapshot.playback.is_some() {
        lines.push("/play to listen".to_string());
    }
    lines
}
