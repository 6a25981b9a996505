use tokio::sync::watch;

/// Cooperative stop flag shared by every service and worker task.
///
/// Cloning hands out another handle onto the same flag; any handle can
/// raise it, and every handle can await it. The flag only ever goes up, so
/// late subscribers and handles that poll after the fact all see the same
/// answer.
#[derive(Clone)]
pub struct Shutdown {
    raise: watch::Sender<bool>,
    observe: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (raise, observe) = watch::channel(false);
        Shutdown { raise, observe }
    }
}

impl Shutdown {
    /// Waits until the flag is raised; resolves immediately if it already
    /// is.
    pub async fn recv(&mut self) {
        // An Err here means every sender is gone, which only happens when
        // the process is tearing down anyway.
        let _ = self.observe.wait_for(|raised| *raised).await;
    }

    /// Raises the flag for every handle, current and future.
    pub fn broadcast_shutdown(&mut self) {
        let _ = self.raise.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_clone_observes_the_flag() {
        let mut origin = Shutdown::default();
        let mut before = origin.clone();
        origin.broadcast_shutdown();
        let mut after = origin.clone();

        before.recv().await;
        after.recv().await;
        origin.recv().await;
    }
}
