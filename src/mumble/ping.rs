use std::time::{Duration, Instant};

/// Incremental round-trip statistics (Welford), so long-running
/// connections keep O(1) state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RttEstimate {
    count: u32,
    mean: f64,
    m2: f64,
}

impl RttEstimate {
    pub fn record(&mut self, sample_ms: f64) {
        self.count += 1;
        let delta = sample_ms - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (sample_ms - self.mean);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / f64::from(self.count)
        }
    }
}

/// Outcome of polling the scheduler at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PingDue {
    /// Nothing to do yet.
    No,
    /// A ping should be emitted now.
    Send,
    /// The in-flight cap was hit: the connection is considered dead.
    Exceeded,
}

/// Periodic data-channel ping schedule with an in-flight cap.
///
/// Deadline-based: the owner calls [`poll`](PingScheduler::poll) with the
/// current time and emits a ping when told to.
#[derive(Debug)]
pub(crate) struct PingScheduler {
    interval: Duration,
    max_in_flight: u32,
    in_flight: u32,
    next_at: Option<Instant>,
    data_rtt: RttEstimate,
    voice_rtt: RttEstimate,
}

impl PingScheduler {
    pub fn new(interval: Duration, max_in_flight: u32) -> Self {
        Self {
            interval,
            max_in_flight,
            in_flight: 0,
            next_at: None,
            data_rtt: RttEstimate::default(),
            voice_rtt: RttEstimate::default(),
        }
    }

    /// Arms the periodic timer. Called once the server sync arrives.
    pub fn start(&mut self, now: Instant) {
        self.next_at = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_at = None;
        self.in_flight = 0;
    }

    pub fn poll(&mut self, now: Instant) -> PingDue {
        match self.next_at {
            Some(deadline) if deadline <= now => {
                if self.in_flight >= self.max_in_flight {
                    self.stop();
                    PingDue::Exceeded
                } else {
                    self.in_flight += 1;
                    self.next_at = Some(now + self.interval);
                    PingDue::Send
                }
            }
            _ => PingDue::No,
        }
    }

    /// Accounts an answered data ping. Returns false when no ping was in
    /// flight, in which case the pong must be ignored.
    pub fn record_pong(&mut self, rtt_ms: f64) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        self.in_flight -= 1;
        self.data_rtt.record(rtt_ms);
        true
    }

    pub fn record_voice_rtt(&mut self, rtt_ms: f64) {
        self.voice_rtt.record(rtt_ms);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn data_rtt(&self) -> &RttEstimate {
        &self.data_rtt
    }

    pub fn voice_rtt(&self) -> &RttEstimate {
        &self.voice_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::{PingDue, PingScheduler, RttEstimate};
    use std::time::{Duration, Instant};

    /// Welford statistics match the closed-form mean and variance.
    #[test]
    fn rtt_estimate_matches_closed_form() {
        // Arrange
        let mut rtt = RttEstimate::default();
        let samples = [10.0, 20.0, 30.0, 40.0];
        // Act
        for sample in samples {
            rtt.record(sample);
        }
        // Assert
        assert_eq!(rtt.count(), 4);
        assert!((rtt.mean() - 25.0).abs() < 1e-9);
        // Population variance of 10,20,30,40 is 125.
        assert!((rtt.variance() - 125.0).abs() < 1e-9);
    }

    /// An empty estimate reports zero variance.
    #[test]
    fn rtt_estimate_empty_is_zero() {
        // Arrange
        let rtt = RttEstimate::default();
        // Act
        // Assert
        assert_eq!(rtt.count(), 0);
        assert_eq!(rtt.mean(), 0.0);
        assert_eq!(rtt.variance(), 0.0);
    }

    /// The scheduler stays idle until armed and until the deadline passes.
    #[test]
    fn poll_respects_deadline() {
        // Arrange
        let mut ping = PingScheduler::new(Duration::from_millis(100), 2);
        let t0 = Instant::now();
        // Act
        // Assert
        assert_eq!(ping.poll(t0), PingDue::No);
        ping.start(t0);
        assert_eq!(ping.poll(t0 + Duration::from_millis(50)), PingDue::No);
        assert_eq!(ping.poll(t0 + Duration::from_millis(100)), PingDue::Send);
        assert_eq!(ping.in_flight(), 1);
    }

    /// Hitting the in-flight cap reports the connection dead and disarms.
    #[test]
    fn poll_exceeds_after_unanswered_pings() {
        // Arrange
        let mut ping = PingScheduler::new(Duration::from_millis(10), 2);
        let t0 = Instant::now();
        ping.start(t0);
        // Act
        assert_eq!(ping.poll(t0 + Duration::from_millis(10)), PingDue::Send);
        assert_eq!(ping.poll(t0 + Duration::from_millis(20)), PingDue::Send);
        let third = ping.poll(t0 + Duration::from_millis(30));
        // Assert
        assert_eq!(third, PingDue::Exceeded);
        assert_eq!(ping.poll(t0 + Duration::from_millis(40)), PingDue::No);
    }

    /// Pongs decrement the in-flight count and feed the statistics.
    #[test]
    fn record_pong_tracks_in_flight_and_rtt() {
        // Arrange
        let mut ping = PingScheduler::new(Duration::from_millis(10), 2);
        let t0 = Instant::now();
        ping.start(t0);
        ping.poll(t0 + Duration::from_millis(10));
        // Act
        let accepted = ping.record_pong(42.0);
        let spurious = ping.record_pong(42.0);
        // Assert
        assert!(accepted);
        assert!(!spurious);
        assert_eq!(ping.in_flight(), 0);
        assert_eq!(ping.data_rtt().count(), 1);
        assert!((ping.data_rtt().mean() - 42.0).abs() < 1e-9);
    }
}
