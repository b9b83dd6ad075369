//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::ChannelId;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use crate::error::{MusicError, MusicResult};
use crate::idle::IdleReason;
use crate::models::Track;
use crate::playback::{Notifier, Player};
use crate::voice::VoiceConnection;

#[derive(Default)]
pub struct FakePlayer {
    plays: StdMutex<Vec<String>>,
    pending: StdMutex<Option<oneshot::Sender<()>>>,
    failing: StdMutex<HashSet<String>>,
    gate: StdMutex<Option<Arc<Notify>>>,
    playing: AtomicBool,
    paused: AtomicBool,
}

impl FakePlayer {
    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().unwrap().clone()
    }

    pub fn fail_on(&self, stream_url: &str) {
        self.failing.lock().unwrap().insert(stream_url.to_string());
    }

    /// Makes the next `play` wait until the returned gate is notified, like a
    /// stream that is slow to open.
    pub fn hold_next_play(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));

        gate
    }

    /// Ends the current track as if it ran out.
    pub fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        if let Some(sender) = self.pending.lock().unwrap().take() {
            let _ = sender.send(());
        }
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, stream_url: &str) -> MusicResult<oneshot::Receiver<()>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.lock().unwrap().contains(stream_url) {
            return Err(MusicError::Player(format!("cannot open {stream_url}")));
        }

        let (sender, receiver) = oneshot::channel();
        self.plays.lock().unwrap().push(stream_url.to_string());
        *self.pending.lock().unwrap() = Some(sender);
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        Ok(receiver)
    }

    async fn pause(&self) -> MusicResult<()> {
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> MusicResult<()> {
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> MusicResult<()> {
        // Stopping a track reports its end, like a natural finish.
        self.finish();
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    NowPlaying(String),
    QueueEnded,
    PlayFailed(String),
    IdleDisconnect(IdleReason),
}

pub struct FakeNotifier {
    sender: mpsc::UnboundedSender<Notice>,
    receiver: Mutex<mpsc::UnboundedReceiver<Notice>>,
}

impl Default for FakeNotifier {
    fn default() -> FakeNotifier {
        let (sender, receiver) = mpsc::unbounded_channel();
        FakeNotifier { sender, receiver: Mutex::new(receiver) }
    }
}

impl FakeNotifier {
    pub async fn next(&self) -> Notice {
        let mut receiver = self.receiver.lock().await;

        match tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Some(notice)) => notice,
            _ => panic!("no notice was sent"),
        }
    }

    pub fn is_quiet(&self) -> bool {
        match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv().is_err(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn now_playing(&self, _channel: ChannelId, _voice_channel: ChannelId, track: &Track) {
        let _ = self.sender.send(Notice::NowPlaying(track.title.clone()));
    }

    async fn queue_ended(&self, _channel: ChannelId) {
        let _ = self.sender.send(Notice::QueueEnded);
    }

    async fn play_failed(&self, _channel: ChannelId, track: &Track, _error: &MusicError) {
        let _ = self.sender.send(Notice::PlayFailed(track.title.clone()));
    }

    async fn idle_disconnect(&self, _channel: ChannelId, reason: IdleReason) {
        let _ = self.sender.send(Notice::IdleDisconnect(reason));
    }
}

pub struct FakeVoice {
    channel: StdMutex<Option<ChannelId>>,
    members: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeVoice {
    pub fn connected_to(channel: ChannelId, members: usize) -> FakeVoice {
        FakeVoice {
            channel: StdMutex::new(Some(channel)),
            members: AtomicUsize::new(members),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn set_members(&self, members: usize) {
        self.members.store(members, Ordering::SeqCst);
    }

    pub fn drop_connection(&self) {
        *self.channel.lock().unwrap() = None;
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeVoice {
    async fn connect(&self, channel: ChannelId) -> MusicResult<()> {
        *self.channel.lock().unwrap() = Some(channel);
        Ok(())
    }

    async fn move_to(&self, channel: ChannelId) -> MusicResult<()> {
        self.connect(channel).await
    }

    async fn disconnect(&self) -> MusicResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.channel.lock().unwrap().is_some()
    }

    async fn channel_id(&self) -> Option<ChannelId> {
        *self.channel.lock().unwrap()
    }

    async fn member_count(&self) -> usize {
        self.members.load(Ordering::SeqCst)
    }
}
