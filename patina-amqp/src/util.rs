use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::time::{Instant, Sleep};

/// Whether an event loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Running {
    Continue,
    Stop,
}

/// A timer that fires when nothing was read for `duration`
#[derive(Debug)]
pub struct IdleTimeout {
    delay: Pin<Box<Sleep>>,
    duration: Duration,
}

impl IdleTimeout {
    pub fn new(duration: Duration) -> Self {
        let delay = Box::pin(tokio::time::sleep(duration));
        Self { delay, duration }
    }

    pub fn reset(&mut self) {
        let next = Instant::now() + self.duration;
        self.delay.as_mut().reset(next);
    }
}

impl Future for IdleTimeout {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.delay.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::IdleTimeout;

    #[tokio::test]
    async fn fires_after_duration() {
        let timeout = IdleTimeout::new(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), timeout)
            .await
            .expect("idle timeout should fire");
    }
}
