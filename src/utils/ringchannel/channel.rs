use log::warn;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use thiserror::Error;

use std::{
    num::NonZeroUsize,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("The channel was closed (no sender)")]
    Closed,

    #[error("No data available in channel")]
    Empty,

    #[error("Timed out waiting for data")]
    Timeout,
}

/// Loss counters of one consumer channel, for external reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: String,
    pub capacity: usize,
    pub delivered: u64,
    pub dropped: u64,
}

// A panic while holding one of these locks leaves the buffers structurally
// valid, so poisoning is ignored.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One logical stream fanned out into an independent bounded buffer per
/// consumer. Writers never block: a full consumer buffer drops the new item
/// and counts the loss, without affecting the other consumers.
#[derive(Debug)]
pub struct Channel<T> {
    inner: Mutex<ChannelInner<T>>,
}

#[derive(Debug)]
struct ChannelInner<T> {
    receivers: Vec<(usize, Arc<ReceiverShared<T>>)>,
    counter: usize,
    senders: usize,
    is_closed: bool,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                receivers: vec![],
                counter: 0usize,
                senders: 0usize,
                is_closed: false,
            }),
        }
    }
}

impl<T: Clone> Channel<T> {
    /// Returns the number of consumers that had to drop `data`.
    fn write(&self, data: T) -> usize {
        let inner = lock(&self.inner);

        inner
            .receivers
            .iter()
            .filter(|(_, receiver)| !receiver.write(data.clone()))
            .count()
    }
}

impl<T> Channel<T> {
    pub fn add_receiver(name: &str, capacity: NonZeroUsize, this: &Arc<Channel<T>>) -> Receiver<T> {
        let mut inner = lock(&this.inner);

        let index = inner.counter;
        inner.counter += 1;

        let shared = Arc::new(ReceiverShared::<T>::new(name, capacity, inner.is_closed));

        inner.receivers.push((index, shared.clone()));

        Receiver {
            shared,
            channel_index: index,
            channel: this.clone(),
        }
    }

    fn remove_receiver(&self, index: usize) {
        let mut inner = lock(&self.inner);
        inner.receivers.retain(|(i, _)| *i != index);
    }

    fn add_sender(&self) {
        lock(&self.inner).senders += 1;
    }

    fn remove_sender(&self) {
        let mut inner = lock(&self.inner);

        inner.senders = inner.senders.saturating_sub(1);

        if inner.senders == 0 {
            inner.is_closed = true;

            for (_, recv) in inner.receivers.iter() {
                lock(&recv.inner).closed = true;
                recv.cv.notify_all();
            }
        }
    }

    fn stats(&self) -> Vec<ChannelStats> {
        lock(&self.inner)
            .receivers
            .iter()
            .map(|(_, r)| r.stats())
            .collect()
    }

    #[allow(dead_code)]
    fn num_receivers(&self) -> usize {
        lock(&self.inner).receivers.len()
    }
}

#[derive(Debug)]
struct ReceiverShared<T> {
    name: String,
    capacity: NonZeroUsize,
    inner: Mutex<ReceiverInner<T>>,
    cv: Condvar,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct ReceiverInner<T> {
    buf: AllocRingBuffer<T>,
    closed: bool,
}

impl<T> ReceiverShared<T> {
    fn new(name: &str, capacity: NonZeroUsize, closed: bool) -> Self {
        Self {
            name: name.to_string(),
            capacity,
            inner: Mutex::new(ReceiverInner {
                buf: AllocRingBuffer::new(capacity.get()),
                closed,
            }),
            cv: Condvar::default(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue-or-drop. Returns false if the item was dropped.
    fn write(&self, data: T) -> bool {
        let mut inner = lock(&self.inner);

        if inner.buf.is_full() {
            drop(inner);

            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

            // Report on 1, 2, 4, 8, ... so a stalled consumer does not flood the log
            if dropped.is_power_of_two() {
                warn!(
                    "Channel '{}' is full: {} items dropped so far",
                    self.name, dropped
                );
            }

            return false;
        }

        inner.buf.push(data);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.cv.notify_one();

        true
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            name: self.name.clone(),
            capacity: self.capacity.get(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct Receiver<T> {
    shared: Arc<ReceiverShared<T>>,
    channel_index: usize,
    channel: Arc<Channel<T>>,
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.channel.remove_receiver(self.channel_index);
    }
}

impl<T> Receiver<T> {
    /// Blocks until an item is available or every sender is gone.
    pub fn recv(&self) -> Result<T, ChannelError> {
        let inner = lock(&self.shared.inner);

        let mut inner = self
            .shared
            .cv
            .wait_while(inner, |inner| inner.buf.is_empty() && !inner.closed)
            .unwrap_or_else(PoisonError::into_inner);

        inner.buf.dequeue().ok_or(ChannelError::Closed)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        let inner = lock(&self.shared.inner);

        let (mut inner, result) = self
            .shared
            .cv
            .wait_timeout_while(inner, timeout, |inner| {
                inner.buf.is_empty() && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);

        match inner.buf.dequeue() {
            Some(v) => Ok(v),
            None if result.timed_out() => Err(ChannelError::Timeout),
            None => Err(ChannelError::Closed),
        }
    }

    pub fn try_recv(&self) -> Result<T, ChannelError> {
        let mut inner = lock(&self.shared.inner);

        match inner.buf.dequeue() {
            Some(v) => Ok(v),
            None if inner.closed => Err(ChannelError::Closed),
            None => Err(ChannelError::Empty),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity.get()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.inner).buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats()
    }
}

/// Producer side of a fan-out. Clones are additional producers on the same
/// stream; consumers see the channel closed once the last one is dropped.
#[derive(Debug)]
pub struct Sender<T> {
    channel: Arc<Channel<T>>,
}

impl<T> Sender<T> {
    fn new(channel: Arc<Channel<T>>) -> Self {
        channel.add_sender();
        Sender { channel }
    }

    /// Attaches a new consumer. It only sees items sent after this call.
    pub fn subscribe(&self, name: &str, capacity: NonZeroUsize) -> Receiver<T> {
        Channel::add_receiver(name, capacity, &self.channel)
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channel.stats()
    }
}

impl<T: Clone> Sender<T> {
    /// Never blocks. Returns the number of consumers that dropped `val`.
    pub fn send(&self, val: T) -> usize {
        self.channel.write(val)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender::new(self.channel.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.channel.remove_sender();
    }
}

/// Creates a fan-out with one bounded consumer channel per `(name, capacity)`.
/// Receivers are returned in the same order as `consumers`.
pub fn fanout<T>(consumers: &[(&str, NonZeroUsize)]) -> (Sender<T>, Vec<Receiver<T>>) {
    let channel = Arc::new(Channel::<T>::default());

    let receivers = consumers
        .iter()
        .map(|(name, capacity)| Channel::add_receiver(name, *capacity, &channel))
        .collect();

    (Sender::new(channel), receivers)
}

#[cfg(test)]
mod tests {
    use std::{sync::Weak, thread};

    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_simple_channel() {
        let (s, mut r) = fanout::<f32>(&[("a", cap(2)), ("b", cap(2))]);
        let r_try = r.pop().unwrap();
        let r_recv = r.pop().unwrap();

        assert_eq!(r_try.try_recv(), Err(ChannelError::Empty));

        s.send(1.1);
        assert_eq!(r_recv.recv(), Ok(1.1));
        assert_eq!(r_try.try_recv(), Ok(1.1));

        s.send(1.2);
        assert_eq!(r_recv.recv(), Ok(1.2));
        assert_eq!(r_try.try_recv(), Ok(1.2));

        assert_eq!(r_try.try_recv(), Err(ChannelError::Empty));
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let (s, r) = fanout::<f32>(&[("a", cap(2))]);

        assert_eq!(s.send(1.1), 0);
        assert_eq!(s.send(1.2), 0);
        assert_eq!(s.send(1.3), 1);

        assert_eq!(r[0].recv(), Ok(1.1));
        assert_eq!(r[0].recv(), Ok(1.2));
        assert_eq!(r[0].try_recv(), Err(ChannelError::Empty));
        assert_eq!(r[0].dropped(), 1);
    }

    #[test]
    fn test_slow_consumer_does_not_starve_others() {
        let (s, r) = fanout::<u32>(&[("slow", cap(1)), ("fast", cap(8))]);

        for i in 0..4 {
            s.send(i);
        }

        assert_eq!(r[0].recv(), Ok(0));
        assert_eq!(r[0].dropped(), 3);

        for i in 0..4 {
            assert_eq!(r[1].recv(), Ok(i));
        }
        assert_eq!(r[1].dropped(), 0);

        let stats = s.stats();
        assert_eq!(stats[0].delivered, 1);
        assert_eq!(stats[1].delivered, 4);
    }

    #[test]
    fn test_close_on_last_sender() {
        let (s, r) = fanout::<f32>(&[("a", cap(4))]);
        let s2 = s.clone();

        s.send(1.0);
        drop(s);

        s2.send(2.0);
        drop(s2);

        assert_eq!(r[0].recv(), Ok(1.0));
        assert_eq!(r[0].recv(), Ok(2.0));
        assert_eq!(r[0].recv(), Err(ChannelError::Closed));
        assert_eq!(r[0].try_recv(), Err(ChannelError::Closed));
    }

    #[test]
    fn test_drop_receivers() {
        let (s, r) = fanout::<f32>(&[("a", cap(2)), ("b", cap(3))]);

        assert_eq!(s.channel.num_receivers(), 2);

        let r3 = s.subscribe("c", cap(1));
        assert_eq!(s.channel.num_receivers(), 3);

        drop(r);
        drop(r3);

        assert_eq!(s.channel.num_receivers(), 0);

        // Send still works fine
        assert_eq!(s.send(1.0), 0);
    }

    #[test]
    fn test_drop_and_readd_receiver() {
        let (s, mut r) = fanout::<f32>(&[("a", cap(2))]);
        let r = r.pop().unwrap();

        let w_channel: Weak<Channel<f32>> = Arc::downgrade(&s.channel);

        s.send(1.1);
        assert_eq!(r.try_recv(), Ok(1.1));

        drop(r);

        let channel = Weak::upgrade(&w_channel);
        assert!(channel.is_some());

        let r2 = Channel::<f32>::add_receiver("b", cap(3), &channel.unwrap());

        s.send(2.2);
        assert_eq!(r2.try_recv(), Ok(2.2));
    }

    #[test]
    fn test_recv_timeout() {
        let (s, r) = fanout::<f32>(&[("a", cap(2))]);

        assert_eq!(
            r[0].recv_timeout(Duration::from_millis(10)),
            Err(ChannelError::Timeout)
        );

        s.send(3.0);
        assert_eq!(r[0].recv_timeout(Duration::from_millis(10)), Ok(3.0));

        drop(s);
        assert_eq!(
            r[0].recv_timeout(Duration::from_millis(10)),
            Err(ChannelError::Closed)
        );
    }

    #[test]
    fn test_thread_send() {
        let (s, r) = fanout::<f32>(&[("a", cap(2))]);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            s.send(1.1);
        });

        assert_eq!(r[0].recv(), Ok(1.1));

        handle.join().unwrap();
    }

    #[test]
    fn test_thread_drop() {
        let (s, r) = fanout::<f32>(&[("a", cap(2))]);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(s);
        });

        assert_eq!(r[0].recv(), Err(ChannelError::Closed));

        handle.join().unwrap();
    }
}
