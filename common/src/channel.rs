use crate::{
    fade::FadeCommand,
    types::{Channel, PwmChannel},
};

/// Current and previously active channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    current: Channel,
    previous: Channel,
}

impl ChannelState {
    pub fn new(channel: Channel) -> Self {
        Self {
            current: channel,
            previous: channel,
        }
    }

    pub fn current(&self) -> Channel {
        self.current
    }

    pub fn previous(&self) -> Channel {
        self.previous
    }

    /// Returns `true` when `next` differs from the current selection.
    pub fn select(&mut self, next: Channel) -> bool {
        if next == self.current {
            return false;
        }
        self.previous = self.current;
        self.current = next;
        true
    }
}

/// Fades every output of `channel` to `percent`. Outputs are commanded one at
/// a time with `settle_ms` between them so both never ramp from the same edge.
pub fn level_plan(
    channel: Channel,
    percent: u8,
    duration_ms: u32,
    settle_ms: u32,
) -> Vec<FadeCommand> {
    let mut plan = Vec::with_capacity(3);
    for &output in channel.outputs() {
        push_fade(&mut plan, output, percent, duration_ms, settle_ms);
    }
    plan
}

/// Moves the light from `from` to `to` while powered on: outputs leaving the
/// selection go dark first, outputs entering it fade up to `percent`.
pub fn reselection_plan(
    from: Channel,
    to: Channel,
    percent: u8,
    duration_ms: u32,
    settle_ms: u32,
) -> Vec<FadeCommand> {
    let mut plan = Vec::with_capacity(3);

    for &output in from.outputs() {
        if !to.drives(output) {
            push_fade(&mut plan, output, 0, duration_ms, settle_ms);
        }
    }
    for &output in to.outputs() {
        if !from.drives(output) {
            push_fade(&mut plan, output, percent, duration_ms, settle_ms);
        }
    }

    plan
}

fn push_fade(
    plan: &mut Vec<FadeCommand>,
    channel: PwmChannel,
    percent: u8,
    duration_ms: u32,
    settle_ms: u32,
) {
    if !plan.is_empty() {
        plan.push(FadeCommand::Settle(settle_ms));
    }
    plan.push(FadeCommand::Fade {
        channel,
        percent,
        duration_ms,
    });
}
