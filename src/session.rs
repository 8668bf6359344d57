//! Per-conversation token history and context windowing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

/// One conversation's token history: a bounded deque of whole turns plus
/// cumulative token accounting for the caller.
#[derive(Debug)]
pub struct Session {
    id: String,
    max_window: usize,
    turns: VecDeque<Vec<u32>>,
    total_len: usize,
    created_at: SystemTime,
    last_activity: SystemTime,
    prompt_tokens: u64,
    generated_tokens: u64,
}

impl Session {
    fn new(id: String, max_window: usize) -> Self {
        let now = SystemTime::now();
        Session {
            id,
            max_window,
            turns: VecDeque::new(),
            total_len: 0,
            created_at: now,
            last_activity: now,
            prompt_tokens: 0,
            generated_tokens: 0,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append one whole turn (prompt plus generated tokens), then trim
    /// whole turns oldest-first until the history fits the window again.
    /// Turns are never split; decode boundaries stay intact.
    pub fn append_turn(&mut self, tokens: Vec<u32>) {
        self.total_len += tokens.len();
        self.turns.push_back(tokens);
        while self.total_len > self.max_window {
            match self.turns.pop_front() {
                Some(oldest) => self.total_len -= oldest.len(),
                None => break,
            }
        }
        self.last_activity = SystemTime::now();
    }

    /// Flattened token history; never longer than the window.
    pub fn window(&self) -> Vec<u32> {
        self.window_within(self.max_window)
    }

    /// The newest whole turns whose combined length fits `budget`,
    /// flattened in chronological order.
    pub fn window_within(&self, budget: usize) -> Vec<u32> {
        let mut fit = 0usize;
        let mut used = 0usize;
        for turn in self.turns.iter().rev() {
            if used + turn.len() > budget {
                break;
            }
            used += turn.len();
            fit += 1;
        }
        let skip = self.turns.len() - fit;
        self.turns.iter().skip(skip).flatten().copied().collect()
    }

    /// Add one call's token counts to the cumulative totals.
    pub fn record_usage(&mut self, prompt: usize, generated: usize) {
        self.prompt_tokens += prompt as u64;
        self.generated_tokens += generated as u64;
        self.last_activity = SystemTime::now();
    }

    /// Total tokens currently held in history.
    pub fn len(&self) -> usize {
        self.total_len
    }

    /// True when no turns are stored.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of whole turns currently held.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Cumulative prompt tokens across all calls.
    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    /// Cumulative generated tokens across all calls.
    pub fn generated_tokens(&self) -> u64 {
        self.generated_tokens
    }

    /// Creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Time of the last append or usage record.
    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }
}

/// Owner of all sessions. Distinct sessions proceed fully in parallel;
/// calls against the same session serialize on its mutex.
#[derive(Debug)]
pub struct SessionStore {
    max_window: usize,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Create a store whose sessions trim to `max_window` tokens.
    pub fn new(max_window: usize) -> Self {
        SessionStore {
            max_window,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a session, creating it on first use.
    pub fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().unwrap().get(id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().unwrap();
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Session::new(id.to_string(), self.max_window)))
        }))
    }

    /// Drop a session and its history. Returns whether it existed.
    pub fn reset(&self, id: &str) -> bool {
        self.sessions.write().unwrap().remove(id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// True when no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_never_exceeds_bound() {
        let store = SessionStore::new(10);
        let session = store.get_or_create("s");
        let mut session = session.lock().unwrap();
        for turn in 0..50 {
            session.append_turn(vec![turn; 3]);
            assert!(session.window().len() <= 10);
            assert!(session.len() <= 10);
        }
    }

    #[test]
    fn trimming_drops_whole_turns_oldest_first() {
        let store = SessionStore::new(8);
        let session = store.get_or_create("s");
        let mut session = session.lock().unwrap();
        session.append_turn(vec![1, 1, 1]);
        session.append_turn(vec![2, 2, 2]);
        session.append_turn(vec![3, 3, 3]);
        // 9 > 8: the oldest turn goes entirely; the rest stay intact.
        assert_eq!(session.window(), vec![2, 2, 2, 3, 3, 3]);
        assert_eq!(session.turn_count(), 2);
    }

    #[test]
    fn oversized_single_turn_is_dropped_rather_than_split() {
        let store = SessionStore::new(4);
        let session = store.get_or_create("s");
        let mut session = session.lock().unwrap();
        session.append_turn(vec![7; 9]);
        assert!(session.is_empty());
        assert_eq!(session.len(), 0);
    }

    #[test]
    fn window_within_budget_takes_newest_whole_turns() {
        let store = SessionStore::new(100);
        let session = store.get_or_create("s");
        let mut session = session.lock().unwrap();
        session.append_turn(vec![1; 4]);
        session.append_turn(vec![2; 4]);
        session.append_turn(vec![3; 4]);
        assert_eq!(session.window_within(9), vec![2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(session.window_within(3), Vec::<u32>::new());
        assert_eq!(session.window_within(100).len(), 12);
    }

    #[test]
    fn usage_counters_accumulate() {
        let store = SessionStore::new(100);
        let session = store.get_or_create("s");
        let mut session = session.lock().unwrap();
        session.record_usage(10, 20);
        session.record_usage(5, 7);
        assert_eq!(session.prompt_tokens(), 15);
        assert_eq!(session.generated_tokens(), 27);
        assert!(session.last_activity() >= session.created_at());
    }

    #[test]
    fn get_or_create_returns_the_same_session() {
        let store = SessionStore::new(100);
        {
            let session = store.get_or_create("a");
            session.lock().unwrap().append_turn(vec![1, 2]);
        }
        let session = store.get_or_create("a");
        assert_eq!(session.lock().unwrap().len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reset_destroys_history() {
        let store = SessionStore::new(100);
        store.get_or_create("a");
        assert!(store.reset("a"));
        assert!(!store.reset("a"));
        assert!(store.is_empty());
        let session = store.get_or_create("a");
        assert!(session.lock().unwrap().is_empty());
    }

    #[test]
    fn distinct_sessions_do_not_interfere() {
        let store = Arc::new(SessionStore::new(50));
        let mut handles = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let session = store.get_or_create(name);
                    session.lock().unwrap().append_turn(vec![0; 5]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 4);
        for name in ["a", "b", "c", "d"] {
            assert!(store.get_or_create(name).lock().unwrap().len() <= 50);
        }
    }
}
