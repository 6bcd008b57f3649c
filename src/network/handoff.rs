// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::{AppError, AppResult};

/// Bounded queue carrying work from other threads into the reactor.
///
/// Producers block while the queue is full. The reactor wakes up on the first
/// item and takes everything queued before dispatching readiness events.
pub fn hand_off<T>(capacity: usize) -> (HandOffSender<T>, HandOffReceiver<T>) {
    let (tx, rx) = async_channel::bounded(capacity);
    (HandOffSender { tx }, HandOffReceiver { rx })
}

#[derive(Debug)]
pub struct HandOffSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for HandOffSender<T> {
    fn clone(&self) -> Self {
        HandOffSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T> HandOffSender<T> {
    /// Blocks the calling thread until there is room. Never call it from
    /// inside the runtime driving the reactor.
    pub fn offer(&self, item: T) -> AppResult<()> {
        self.tx
            .send_blocking(item)
            .map_err(|_| AppError::IllegalStateError("reactor has stopped".to_string()))
    }

    /// Returns `false` instead of blocking when the queue is full.
    pub fn try_offer(&self, item: T) -> AppResult<bool> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(AppError::IllegalStateError(
                "reactor has stopped".to_string(),
            )),
        }
    }
}

#[derive(Debug)]
pub struct HandOffReceiver<T> {
    rx: Receiver<T>,
}

impl<T> HandOffReceiver<T> {
    /// Waits for the next item, `None` once every sender is gone.
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Takes every queued item without waiting.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return items,
            }
        }
    }
}
