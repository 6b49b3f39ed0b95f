use crate::core::hardware::{HardwareMessage, PinLayout};
use crate::game::row::{ChartInstant, NoteSymbol};
use crate::game::snap::{self, SnapPin};
use crate::game::time::Time;
use log::debug;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

/// Blink length and pin layout used when compiling rows into messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParams {
    /// How long a tap keeps its lamp lit.
    pub blink: Time,
    /// Length of the forced dark gap before a retriggered lamp.
    pub microblink: Time,
    pub layout: PinLayout,
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            blink: Time::from_ratio(6, 100),
            microblink: Time::from_ratio(1, 100),
            layout: PinLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinAction {
    Off,
    On,
    OnBlink,
}

#[derive(Debug, Clone)]
struct PinEvent {
    pin: usize,
    action: PinAction,
    time: Time,
    row: usize,
}

/// Hold or roll span of one pin, from its head to its tail. A hold that never
/// ends has no tail.
#[derive(Debug, Clone)]
struct HoldSpan {
    head: Time,
    tail: Option<Time>,
}

impl HoldSpan {
    fn covers(&self, time: &Time) -> bool {
        self.head < *time && self.tail.as_ref().is_none_or(|tail| time <= tail)
    }
}

type HoldMap = FxHashMap<usize, Vec<HoldSpan>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// State changes requested by rows at this instant.
    Main,
    /// Auto-off for lamps that blinked on `blink` earlier.
    BlinkClear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMessage {
    pub time: Time,
    pub message: HardwareMessage,
    pub kind: MessageKind,
    /// Index, in the scheduler's input, of the row that produced the message.
    pub row: usize,
}

/// Serializable view of a message for schedule dumps.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub time: String,
    pub seconds: f64,
    pub kind: MessageKind,
    pub row: usize,
    pub pins: String,
    pub bytes: String,
}

impl ScheduledMessage {
    pub fn record(&self) -> MessageRecord {
        MessageRecord {
            time: self.time.to_string(),
            seconds: self.time.to_f64(),
            kind: self.kind,
            row: self.row,
            pins: self.message.to_string(),
            bytes: self.message.to_hex(),
        }
    }
}

/// Compiles timed rows into the ordered message list a stateful receiver can
/// replay verbatim.
#[derive(Debug, Clone, Default)]
pub struct EventScheduler {
    params: ScheduleParams,
}

impl EventScheduler {
    pub fn new(params: ScheduleParams) -> Self {
        Self { params }
    }

    /// `rows` must be sorted by time and contain no blank rows.
    pub fn schedule<R: ChartInstant>(&self, rows: &[R]) -> Vec<ScheduledMessage> {
        debug_assert!(
            rows.windows(2).all(|w| w[0].time() <= w[1].time()),
            "scheduler input must be sorted by time"
        );
        let (events, holds) = self.pin_events(rows);
        let messages = self.merge(events, &holds);
        debug!("Scheduled {} messages for {} rows.", messages.len(), rows.len());
        messages
    }

    fn pin_events<R: ChartInstant>(&self, rows: &[R]) -> (Vec<PinEvent>, HoldMap) {
        let layout = &self.params.layout;
        let mut events = Vec::with_capacity(rows.len() * 4);
        let mut held: FxHashMap<usize, Time> = FxHashMap::default();
        let mut holds = HoldMap::default();
        let mut last_on: FxHashMap<usize, Time> = FxHashMap::default();

        for (index, row) in rows.iter().enumerate() {
            let time = row.time();
            let bare = row.bare();
            let mut activated: SmallVec<[usize; 8]> = SmallVec::new();
            let mut deactivated: SmallVec<[usize; 8]> = SmallVec::new();

            if bare.activates_snap() {
                let roles = snap::classify(row.position()).pin_roles();
                for role in SnapPin::ALL {
                    let pin = layout.snap_pin(role);
                    if roles.contains(&role) {
                        activated.push(pin);
                    } else {
                        deactivated.push(pin);
                    }
                }
            }

            for (lane, symbol) in bare.symbols().iter().enumerate() {
                let Some(pin) = layout.lane_pin(lane) else {
                    continue;
                };
                match symbol {
                    NoteSymbol::Tap => activated.push(pin),
                    NoteSymbol::HoldHead | NoteSymbol::RollHead => {
                        activated.push(pin);
                        if let Some(head) = held.insert(pin, time.clone()) {
                            holds.entry(pin).or_default().push(HoldSpan {
                                head,
                                tail: Some(time.clone()),
                            });
                        }
                    }
                    NoteSymbol::HoldTail | NoteSymbol::RollTail => {
                        deactivated.push(pin);
                        if let Some(head) = held.remove(&pin) {
                            holds.entry(pin).or_default().push(HoldSpan {
                                head,
                                tail: Some(time.clone()),
                            });
                        }
                    }
                    NoteSymbol::Empty | NoteSymbol::Mine => {}
                }
            }

            for pin in activated {
                if let Some(previous) = last_on.get(&pin)
                    && time - previous < self.params.blink
                {
                    events.push(PinEvent {
                        pin,
                        action: PinAction::Off,
                        time: time - &self.params.microblink,
                        row: index,
                    });
                }
                let action = if held.contains_key(&pin) {
                    PinAction::On
                } else {
                    PinAction::OnBlink
                };
                events.push(PinEvent {
                    pin,
                    action,
                    time: time.clone(),
                    row: index,
                });
                last_on.insert(pin, time.clone());
            }

            for pin in deactivated {
                events.push(PinEvent {
                    pin,
                    action: PinAction::Off,
                    time: time.clone(),
                    row: index,
                });
            }
        }
        for (pin, head) in held {
            holds.entry(pin).or_default().push(HoldSpan { head, tail: None });
        }
        (events, holds)
    }

    fn merge(&self, mut events: Vec<PinEvent>, holds: &HoldMap) -> Vec<ScheduledMessage> {
        let layout = &self.params.layout;
        events.sort_by(|a, b| a.time.cmp(&b.time));

        let mut messages = Vec::new();
        for group in events.chunk_by(|a, b| a.time == b.time) {
            let time = &group[0].time;
            let row = group[0].row;
            let clear_time = time + &self.params.blink;
            let mut main = layout.unchanged_message();
            let mut clear = layout.unchanged_message();
            for event in group {
                main.set(event.pin, event.action != PinAction::Off);
                // A pin that became held since the blink started keeps its lamp.
                let held_at_clear = holds
                    .get(&event.pin)
                    .is_some_and(|spans| spans.iter().any(|span| span.covers(&clear_time)));
                if event.action == PinAction::OnBlink && !held_at_clear {
                    clear.set(event.pin, false);
                } else {
                    clear.release(event.pin);
                }
            }

            messages.push(ScheduledMessage {
                time: time.clone(),
                message: main,
                kind: MessageKind::Main,
                row,
            });
            if !clear.is_all_unchanged() {
                messages.push(ScheduledMessage {
                    time: clear_time,
                    message: clear,
                    kind: MessageKind::BlinkClear,
                    row,
                });
            }
        }

        // A clear that lands on a later group's time stays ahead of that
        // group's main message.
        messages.sort_by(|a, b| a.time.cmp(&b.time));
        messages
    }
}
