//! Fixed-capacity voice pool.

use crate::synth::channel::NoteMask;
use crate::synth::voice::{Voice, VoiceLink, VoiceStatus};

/*
Voice Allocation
================

The pool never grows. A note-on always gets a slot: a free one if there is
one, otherwise the least important sounding voice is evicted.

Eviction order (first tier with a candidate wins, lowest mix amplitude
within the tier):

  1. releasing (Off) voices, except protected drums
  2. dying (Die) voices, except protected drums
  3. Sustained voices
  4. either half of a chorus pair, drums included; the surviving half is
     doubled in level and moved to the channel pan so the note keeps its
     loudness
  5. On voices on non-drum channels
  6. anything at all (counted as a lost note, not a cut note)

"Protected drum" means a fixed-pitch sample on a channel that is currently
a drum channel. The question is asked at eviction time, so a program change
or drum-map SysEx between note-on and eviction is honoured.

Voices named in `spare` (usually the ones just started for the same note)
are skipped unless nothing else is live.
*/

/// What the pool needs to know about channels to rank voices.
pub trait EvictionJudge {
    fn is_drum_channel(&self, channel: usize) -> bool;
    fn channel_pan(&self, channel: usize) -> u8;

    /// Fixed-pitch percussion on a drum channel.
    fn is_protected_drum(&self, voice: &Voice) -> bool {
        voice.is_fixed_pitch() && self.is_drum_channel(voice.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Notes evicted from tiers 1-5.
    pub cut_notes: u64,
    /// Notes evicted as a last resort.
    pub lost_notes: u64,
    /// Highest live-voice count seen.
    pub peak_voices: usize,
}

pub struct VoicePool {
    voices: Vec<Voice>,
    upper_bound: usize,
    limit: usize,
    stats: PoolStats,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "voice pool needs at least one slot");
        Self {
            voices: vec![Voice::default(); capacity],
            upper_bound: 0,
            limit: capacity,
            stats: PoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// One past the highest slot used since the last reset.
    pub fn upper_bound(&self) -> usize {
        self.upper_bound
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices[..self.upper_bound]
    }

    pub fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    pub fn voice_mut(&mut self, index: usize) -> &mut Voice {
        &mut self.voices[index]
    }

    /// Resolve a link, `None` if the slot was reused or freed since.
    pub fn get(&self, link: VoiceLink) -> Option<&Voice> {
        self.voices
            .get(link.index)
            .filter(|v| v.generation == link.generation && v.status.is_live())
    }

    pub fn get_mut(&mut self, link: VoiceLink) -> Option<&mut Voice> {
        self.voices
            .get_mut(link.index)
            .filter(|v| v.generation == link.generation && v.status.is_live())
    }

    pub fn live_count(&self) -> usize {
        self.voices[..self.upper_bound]
            .iter()
            .filter(|v| v.status.is_live())
            .count()
    }

    /// Take a slot for a new note. The returned voice is `On` with a fresh
    /// generation and default payload.
    pub fn allocate(&mut self, judge: &impl EvictionJudge, spare: &[usize]) -> usize {
        let index = if self.live_count() >= self.limit {
            self.evict_one(judge, spare)
        } else {
            match self.voices.iter().position(Voice::is_free) {
                Some(index) => index,
                None => self.evict_one(judge, spare),
            }
        };

        let voice = &mut self.voices[index];
        voice.clear();
        voice.generation = voice.generation.wrapping_add(1);
        voice.status = VoiceStatus::On;
        self.upper_bound = self.upper_bound.max(index + 1);

        let live = self.live_count();
        self.stats.peak_voices = self.stats.peak_voices.max(live);
        debug_assert!(live <= self.limit);
        index
    }

    fn lowest<F>(&self, spare: &[usize], filter: F) -> Option<usize>
    where
        F: Fn(&Voice) -> bool,
    {
        self.voices[..self.upper_bound]
            .iter()
            .enumerate()
            .filter(|(i, v)| v.status.is_live() && !spare.contains(i) && filter(*v))
            .min_by(|(_, a), (_, b)| a.mix_amplitude().total_cmp(&b.mix_amplitude()))
            .map(|(i, _)| i)
    }

    /// Free the least important voice and return its now-free slot.
    pub fn evict_one(&mut self, judge: &impl EvictionJudge, spare: &[usize]) -> usize {
        let decaying = self.lowest(spare, |v| v.status == VoiceStatus::Off && !judge.is_protected_drum(v));
        let dying = || self.lowest(spare, |v| v.status == VoiceStatus::Die && !judge.is_protected_drum(v));
        let sustained = || self.lowest(spare, |v| v.status == VoiceStatus::Sustained);

        let victim = decaying.or_else(dying).or_else(sustained);
        if let Some(index) = victim {
            self.stats.cut_notes += 1;
            log::trace!("evicting quiet voice {index}");
            self.free(index);
            return index;
        }

        if let Some(index) = self.lowest(spare, |v| v.chorus_link.is_some()) {
            self.stats.cut_notes += 1;
            log::trace!("evicting chorus half {index}");
            if let Some(partner) = self.voices[index].chorus_link {
                if let Some(survivor) = self.get_mut(partner) {
                    survivor.amp_scale = (survivor.amp_scale * 2.0).min(1.0);
                    survivor.pan = judge.channel_pan(survivor.channel);
                    survivor.detune = 0;
                }
            }
            self.free(index);
            return index;
        }

        if let Some(index) = self.lowest(spare, |v| v.status == VoiceStatus::On && !judge.is_drum_channel(v.channel)) {
            self.stats.cut_notes += 1;
            log::trace!("evicting held voice {index}");
            self.free(index);
            return index;
        }

        let index = self
            .lowest(spare, |_| true)
            .or_else(|| self.lowest(&[], |_| true));
        let Some(index) = index else {
            panic!("voice pool exhausted with no live voice to evict");
        };
        self.stats.lost_notes += 1;
        log::trace!("evicting last-resort voice {index}");
        self.free(index);
        index
    }

    /// Return a slot to the pool. A chorus partner is unlinked too.
    pub fn free(&mut self, index: usize) {
        if let Some(partner) = self.voices[index].chorus_link.take() {
            if let Some(other) = self.get_mut(partner) {
                other.chorus_link = None;
            }
        }
        self.voices[index].clear();
    }

    /// Link two live voices as a chorus pair.
    pub fn link(&mut self, a: usize, b: usize) {
        let link_a = self.voices[a].link(a);
        let link_b = self.voices[b].link(b);
        self.voices[a].chorus_link = Some(link_b);
        self.voices[b].chorus_link = Some(link_a);
    }

    /// Next live voice at or after `from` holding `(channel, note)`.
    pub fn find_same_note_for_retrigger(&self, channel: usize, note: u8, from: usize) -> Option<usize> {
        (from..self.upper_bound).find(|&i| {
            let v = &self.voices[i];
            v.status.is_live() && v.channel == channel && v.note == note
        })
    }

    /// Fast fade to silence.
    pub fn kill(&mut self, index: usize, rate: i32) {
        let voice = &mut self.voices[index];
        if !voice.status.is_live() {
            return;
        }
        voice.status = VoiceStatus::Die;
        voice.amp_env.kill(rate);
        if !voice.amp_env.is_active() {
            self.free(index);
        }
    }

    /// Kill every sounding voice on `channel` whose note is in `group`,
    /// except `note`. Released drums ringing out are choked too.
    pub fn choke(&mut self, channel: usize, group: NoteMask, note: u8, rate: i32) {
        for i in 0..self.upper_bound {
            let v = &self.voices[i];
            let sounding = v.status.is_live() && v.status != VoiceStatus::Die;
            if sounding && v.channel == channel && v.note != note && group.contains(v.note) {
                self.kill(i, rate);
            }
        }
    }

    /// Change the active limit (clamped to capacity), evicting any excess now.
    pub fn set_limit(&mut self, limit: usize, judge: &impl EvictionJudge) {
        self.limit = limit.clamp(1, self.voices.len());
        while self.live_count() > self.limit {
            self.evict_one(judge, &[]);
        }
    }

    /// Shrink the upper bound past trailing free slots.
    pub fn trim_upper_bound(&mut self) {
        while self.upper_bound > 0 && self.voices[self.upper_bound - 1].is_free() {
            self.upper_bound -= 1;
        }
    }

    /// Immediate silence.
    pub fn reset(&mut self) {
        for i in 0..self.upper_bound {
            self.voices[i].clear();
        }
        self.upper_bound = 0;
    }

    pub fn reset_stats(&mut self) {
        self.stats = PoolStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Judge {
        drum_channel: usize,
    }

    impl EvictionJudge for Judge {
        fn is_drum_channel(&self, channel: usize) -> bool {
            channel == self.drum_channel
        }

        fn channel_pan(&self, _channel: usize) -> u8 {
            20
        }
    }

    const JUDGE: Judge = Judge { drum_channel: 9 };

    fn fill(pool: &mut VoicePool, status: VoiceStatus, gains: &[f32]) -> Vec<usize> {
        gains
            .iter()
            .map(|&gain| {
                let i = pool.allocate(&JUDGE, &[]);
                let v = pool.voice_mut(i);
                v.status = status;
                v.left_gain = gain;
                v.right_gain = gain / 2.0;
                i
            })
            .collect()
    }

    #[test]
    fn allocates_free_slots_first() {
        let mut pool = VoicePool::new(4);
        let slots = fill(&mut pool, VoiceStatus::On, &[0.1, 0.2]);
        assert_eq!(slots, vec![0, 1]);
        assert_eq!(pool.upper_bound(), 2);
        assert_eq!(pool.stats().cut_notes, 0);
    }

    #[test]
    fn evicts_quietest_decaying_first() {
        let mut pool = VoicePool::new(3);
        fill(&mut pool, VoiceStatus::On, &[0.01]);
        fill(&mut pool, VoiceStatus::Off, &[0.5, 0.2]);
        let slot = pool.allocate(&JUDGE, &[]);
        assert_eq!(slot, 2, "quietest releasing voice goes, even if an On voice is quieter");
        assert_eq!(pool.stats().cut_notes, 1);
        assert_eq!(pool.live_count(), 3);
    }

    #[test]
    fn protected_drums_survive_decaying_tier() {
        use crate::instrument::{Sample, Wave};
        use std::sync::Arc;

        let mut pool = VoicePool::new(2);
        let slots = fill(&mut pool, VoiceStatus::Off, &[0.1, 0.9]);
        let mut sample = Sample::new(Wave {
            data: vec![0i16; 4].into(),
            sample_rate: 44_100,
            root_freq: 261_626,
            loop_start: 0,
            loop_end: 0,
        });
        sample.note_to_use = Some(60);
        let drum = pool.voice_mut(slots[0]);
        drum.channel = 9;
        drum.sample = Some(Arc::new(sample));

        assert_eq!(pool.evict_one(&JUDGE, &[]), slots[1]);

        // Once the channel stops being a drum channel the voice is fair game.
        let melodic = Judge { drum_channel: 3 };
        let again = pool.allocate(&melodic, &[]);
        pool.voice_mut(again).left_gain = 1.0;
        assert_eq!(pool.evict_one(&melodic, &[]), slots[0]);
    }

    #[test]
    fn chorus_eviction_doubles_survivor() {
        let mut pool = VoicePool::new(3);
        let slots = fill(&mut pool, VoiceStatus::On, &[0.3, 0.4, 0.05]);
        pool.link(slots[0], slots[1]);
        for &i in &slots[..2] {
            pool.voice_mut(i).amp_scale = 0.5;
        }

        let victim = pool.evict_one(&JUDGE, &[]);
        assert_eq!(victim, slots[0]);
        let survivor = pool.voice(slots[1]);
        assert_eq!(survivor.amp_scale, 1.0);
        assert_eq!(survivor.pan, 20);
        assert_eq!(survivor.chorus_link, None);
        assert_eq!(pool.voice(slots[0]).chorus_link, None);
    }

    #[test]
    fn chorus_tier_does_not_protect_drums() {
        use crate::instrument::{Sample, Wave};
        use std::sync::Arc;

        let mut pool = VoicePool::new(3);
        let slots = fill(&mut pool, VoiceStatus::On, &[0.3, 0.4, 0.05]);
        pool.link(slots[0], slots[1]);
        let mut sample = Sample::new(Wave {
            data: vec![0i16; 4].into(),
            sample_rate: 44_100,
            root_freq: 261_626,
            loop_start: 0,
            loop_end: 0,
        });
        sample.note_to_use = Some(38);
        let sample = Arc::new(sample);
        // The pair's channel became a drum channel after the notes started.
        for &i in &slots[..2] {
            let v = pool.voice_mut(i);
            v.channel = 9;
            v.sample = Some(sample.clone());
        }
        assert!(JUDGE.is_protected_drum(pool.voice(slots[0])));

        assert_eq!(pool.evict_one(&JUDGE, &[]), slots[0]);
        assert_eq!(pool.stats().cut_notes, 1);
        assert_eq!(pool.voice(slots[1]).chorus_link, None);
        assert!(pool.voice(slots[2]).status.is_live());
    }

    #[test]
    fn free_clears_both_links() {
        let mut pool = VoicePool::new(2);
        let slots = fill(&mut pool, VoiceStatus::On, &[0.3, 0.4]);
        pool.link(slots[0], slots[1]);
        pool.free(slots[1]);
        assert_eq!(pool.voice(slots[0]).chorus_link, None);
        assert_eq!(pool.voice(slots[1]).chorus_link, None);
    }

    #[test]
    fn stale_links_do_not_resolve() {
        let mut pool = VoicePool::new(1);
        let i = pool.allocate(&JUDGE, &[]);
        let link = pool.voice(i).link(i);
        assert!(pool.get(link).is_some());
        pool.free(i);
        pool.allocate(&JUDGE, &[]);
        assert!(pool.get(link).is_none());
    }

    #[test]
    fn last_resort_counts_lost_notes() {
        let mut pool = VoicePool::new(2);
        fill(&mut pool, VoiceStatus::On, &[0.3, 0.1]);
        for i in 0..2 {
            pool.voice_mut(i).channel = 9;
        }
        let slot = pool.allocate(&JUDGE, &[]);
        assert_eq!(slot, 1);
        assert_eq!(pool.stats().lost_notes, 1);
        assert_eq!(pool.stats().cut_notes, 0);
    }

    #[test]
    fn spare_voices_are_skipped() {
        let mut pool = VoicePool::new(2);
        fill(&mut pool, VoiceStatus::On, &[0.1, 0.9]);
        assert_eq!(pool.evict_one(&JUDGE, &[0]), 1);
        // Nothing else left: the spare goes too.
        assert_eq!(pool.evict_one(&JUDGE, &[0]), 0);
    }

    #[test]
    fn lowering_the_limit_evicts() {
        let mut pool = VoicePool::new(4);
        fill(&mut pool, VoiceStatus::On, &[0.1, 0.2, 0.3, 0.4]);
        pool.set_limit(2, &JUDGE);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.stats().cut_notes, 2);
        let slot = pool.allocate(&JUDGE, &[]);
        assert!(pool.live_count() <= 2);
        assert!(slot < 4);
    }

    #[test]
    fn retrigger_search_walks_forward() {
        let mut pool = VoicePool::new(4);
        let slots = fill(&mut pool, VoiceStatus::On, &[0.1, 0.2, 0.3]);
        for &i in &slots {
            pool.voice_mut(i).note = 60;
        }
        pool.voice_mut(slots[1]).note = 61;
        assert_eq!(pool.find_same_note_for_retrigger(0, 60, 0), Some(0));
        assert_eq!(pool.find_same_note_for_retrigger(0, 60, 1), Some(2));
        assert_eq!(pool.find_same_note_for_retrigger(0, 60, 3), None);
    }
}
