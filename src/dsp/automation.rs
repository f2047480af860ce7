//! Parameter automation
//!
//! A small timeline of value events with the same interpolation rules as a
//! Web Audio `AudioParam`: a set-value event holds its value until the next
//! event, and an exponential ramp event interpolates geometrically from the
//! previous event's value to its own target, reaching it at its own time.

/// A scheduled change of a parameter value
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamEvent {
    SetValue { time: f64, value: f64 },
    ExponentialRamp { time: f64, value: f64 },
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } | ParamEvent::ExponentialRamp { time, .. } => time,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { value, .. } | ParamEvent::ExponentialRamp { value, .. } => {
                value
            }
        }
    }
}

/// Automation timeline for one parameter
///
/// Events must be scheduled in non-decreasing time order.
///
/// # Example
/// ```
/// use stemdeck::dsp::automation::ParamTimeline;
///
/// let mut gain = ParamTimeline::new(1.0);
/// gain.set_value_at_time(0.8, 0.0);
/// gain.exponential_ramp_to_value_at_time(0.01, 0.15);
/// assert!((gain.value_at(0.0) - 0.8).abs() < 1e-12);
/// assert!((gain.value_at(0.15) - 0.01).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct ParamTimeline {
    default_value: f64,
    events: Vec<ParamEvent>,
}

impl ParamTimeline {
    pub fn new(default_value: f64) -> Self {
        Self {
            default_value,
            events: Vec::new(),
        }
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> &mut Self {
        self.events.push(ParamEvent::SetValue { time, value });
        self
    }

    /// Ramp geometrically from the previous event's value to `value`
    ///
    /// Both endpoints must share a sign and be non-zero for the ramp to be
    /// defined; otherwise the previous value holds until `time`.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, time: f64) -> &mut Self {
        self.events.push(ParamEvent::ExponentialRamp { time, value });
        self
    }

    /// Value of the parameter at time `t`
    pub fn value_at(&self, t: f64) -> f64 {
        // Index of the first event strictly after t
        let next = self.events.partition_point(|e| e.time() <= t);

        let (prev_time, prev_value) = match next.checked_sub(1).map(|i| &self.events[i]) {
            Some(event) => (event.time(), event.value()),
            None => (0.0, self.default_value),
        };

        match self.events.get(next) {
            Some(&ParamEvent::ExponentialRamp { time, value }) => {
                exponential_interpolate(prev_time, prev_value, time, value, t)
            }
            _ => prev_value,
        }
    }
}

fn exponential_interpolate(t0: f64, v0: f64, t1: f64, v1: f64, t: f64) -> f64 {
    let span = t1 - t0;
    if span <= 0.0 || v0 == 0.0 || v1 == 0.0 || v0.signum() != v1.signum() {
        return v0;
    }
    v0 * (v1 / v0).powf((t - t0) / span)
}
