use crate::audio::CaptureEvent;
use crate::gateway::{AnswerVerdict, GatewayError, NextQuestion, Section, TtsAudio};
use crate::playback::{PlaybackError, PlaybackEvent};
use crate::timer::TimerEvent;

/// Something the candidate did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Select(String),
    EditText(String),
    PlayAudio,
    StopAudio,
    StartRecording,
    StopRecording,
    ResetRecording,
    /// Listen back to the stopped recording before submitting it.
    ReviewRecording,
    DismissNotice,
    Submit,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Scored(AnswerVerdict),
    Acknowledged,
}

/// Settled gateway calls.
#[derive(Debug)]
pub enum GatewayReply {
    SectionStarted(Result<Section, GatewayError>),
    NextQuestion(Result<NextQuestion, GatewayError>),
    Submitted {
        question_id: String,
        outcome: Result<SubmitOutcome, GatewayError>,
    },
    TtsAudio {
        question_id: String,
        result: Result<TtsAudio, GatewayError>,
    },
    Completed(Result<(), GatewayError>),
}

/// Every input the controller reacts to, other than direct user actions.
#[derive(Debug)]
pub enum SessionEvent {
    Timer(TimerEvent),
    Capture(CaptureEvent),
    Playback(PlaybackEvent),
    Gateway(GatewayReply),
    DwellElapsed { question_id: String },
    ReviewEnded(Result<(), PlaybackError>),
}
