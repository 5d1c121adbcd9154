// SPDX-License-Identifier: MIT
//! Debounce and idle timers. Each timer is a spawned task that sleeps and
//! posts one event; stopping a timer aborts the task so a cancelled timer
//! can never fire.

use super::{Engine, Event};

impl Engine {
    pub(super) fn start_idle_timer(&mut self) {
        self.stop_idle_timer();
        let tx = self.events_tx.clone();
        let delay = self.config.idle_completion_delay;
        self.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::IdleTimeout);
        }));
    }

    pub(super) fn stop_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    pub(super) fn reset_idle_timer(&mut self) {
        self.start_idle_timer();
    }

    pub(super) fn start_text_change_timer(&mut self) {
        self.stop_text_change_timer();
        let tx = self.events_tx.clone();
        let delay = self.config.text_change_debounce;
        self.text_change_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::TextChangeTimeout);
        }));
    }

    pub(super) fn stop_text_change_timer(&mut self) {
        if let Some(timer) = self.text_change_timer.take() {
            timer.abort();
        }
    }
}
