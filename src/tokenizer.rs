//! Vocabulary and greedy longest-match tokenization.

use crate::error::{GptError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Mutex;

/// Padding token id.
pub const PAD: u32 = 0;
/// Unknown token id, emitted per character on no vocabulary match.
pub const UNK: u32 = 1;
/// Begin-of-sequence token id.
pub const BOS: u32 = 2;
/// End-of-sequence token id; sampling it stops generation.
pub const EOS: u32 = 3;
/// Code prompt marker.
pub const CODE: u32 = 4;
/// Analysis prompt marker.
pub const ANALYSIS: u32 = 5;
/// Creative prompt marker.
pub const CREATIVE: u32 = 6;
/// Unrestricted prompt marker.
pub const UNRESTRICTED: u32 = 7;

/// String forms of the reserved ids 0..8, in order.
pub const RESERVED_TOKENS: [&str; 8] = [
    "<pad>",
    "<unk>",
    "<bos>",
    "<eos>",
    "<code>",
    "<analysis>",
    "<creative>",
    "<unrestricted>",
];

/// Longest candidate substring tried against the vocabulary, in characters.
const MAX_MATCH_CHARS: usize = 10;

/// Encode cache capacity in entries.
const CACHE_CAPACITY: usize = 1000;

/// Texts longer than this (in bytes) bypass the encode cache: the key must
/// identify the full input, or a hit could return another text's tokens.
const CACHE_KEY_MAX_LEN: usize = 512;

/// Immutable ordered token table with reverse lookup.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl Vocabulary {
    /// Build a vocabulary from an ordered token list. The first eight
    /// entries must be the reserved tokens and every entry must be unique.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        if tokens.len() < RESERVED_TOKENS.len() {
            return Err(GptError::Tokenizer(format!(
                "vocabulary has {} entries, need at least {}",
                tokens.len(),
                RESERVED_TOKENS.len()
            )));
        }
        for (i, expected) in RESERVED_TOKENS.iter().enumerate() {
            if tokens[i] != *expected {
                return Err(GptError::Tokenizer(format!(
                    "reserved slot {i} holds {:?}, expected {expected:?}",
                    tokens[i]
                )));
            }
        }
        let mut lookup = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if lookup.insert(token.clone(), i as u32).is_some() {
                return Err(GptError::Tokenizer(format!(
                    "duplicate vocabulary entry {token:?}"
                )));
            }
        }
        Ok(Vocabulary { tokens, lookup })
    }

    /// The built-in table: reserved tokens, printable ASCII characters,
    /// programming keywords, and common English words (each word also in a
    /// space-prefixed form so word boundaries encode as single tokens).
    /// Random or loaded weights carry no knowledge of these entries; the
    /// table only fixes the id space.
    pub fn builtin() -> Self {
        let mut tokens: Vec<String> = RESERVED_TOKENS.iter().map(|s| s.to_string()).collect();

        for c in ('a'..='z')
            .chain('A'..='Z')
            .chain('0'..='9')
            .chain("!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~".chars())
            .chain([' ', '\n', '\t'])
        {
            tokens.push(c.to_string());
        }

        const KEYWORDS: [&str; 28] = [
            "def", "class", "import", "from", "return", "if", "else", "elif", "for", "while",
            "try", "except", "finally", "with", "lambda", "yield", "pass", "break", "continue",
            "function", "const", "let", "var", "async", "await", "static", "struct", "impl",
        ];
        const COMMON_WORDS: [&str; 64] = [
            "the", "be", "to", "of", "and", "in", "that", "have", "it", "not", "on", "he", "as",
            "you", "do", "at", "this", "but", "his", "by", "they", "we", "say", "she", "or", "an",
            "will", "my", "one", "all", "would", "there", "their", "what", "so", "up", "out",
            "about", "who", "get", "which", "go", "me", "when", "make", "can", "like", "time",
            "no", "just", "know", "take", "people", "into", "year", "your", "good", "some",
            "hello", "world", "new", "want", "because", "how",
        ];

        for word in KEYWORDS.iter().chain(COMMON_WORDS.iter()) {
            tokens.push(word.to_string());
            tokens.push(format!(" {word}"));
        }

        // Single characters are already present, so every entry is unique.
        Vocabulary::from_tokens(tokens).expect("builtin vocabulary is well-formed")
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True if the table is empty (never, for a validated vocabulary).
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// String form of a token id.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(|s| s.as_str())
    }

    /// Id of a token string.
    pub fn id(&self, token: &str) -> Option<u32> {
        self.lookup.get(token).copied()
    }
}

/// Load a vocabulary from a binary file: u32 entry count, then per entry an
/// i32 byte length followed by UTF-8 bytes.
pub fn load_vocabulary<P: AsRef<Path>>(path: P) -> Result<Vocabulary> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut tokens = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_i32::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let token = String::from_utf8(buf)
            .map_err(|e| GptError::Tokenizer(format!("vocabulary entry is not UTF-8: {e}")))?;
        tokens.push(token);
    }

    Vocabulary::from_tokens(tokens)
}

struct EncodeCache {
    entries: HashMap<(String, usize), (Vec<u32>, u64)>,
    tick: u64,
}

impl EncodeCache {
    fn new() -> Self {
        EncodeCache {
            entries: HashMap::with_capacity(CACHE_CAPACITY),
            tick: 0,
        }
    }

    fn get(&mut self, key: &(String, usize)) -> Option<Vec<u32>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(tokens, used)| {
            *used = tick;
            tokens.clone()
        })
    }

    fn insert(&mut self, key: (String, usize), tokens: Vec<u32>) {
        if self.entries.len() >= CACHE_CAPACITY {
            // Evict the least-recently-used entry.
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.tick += 1;
        self.entries.insert(key, (tokens, self.tick));
    }
}

/// Greedy longest-match tokenizer over an immutable vocabulary.
///
/// Encoding tries candidate substrings of decreasing length (capped at
/// [`MAX_MATCH_CHARS`] characters) at each position; on no match it emits
/// one `<unk>` per character. Results are memoized in a bounded LRU cache;
/// the cache is a performance detail only and never changes output.
pub struct Tokenizer {
    vocab: Vocabulary,
    cache: Mutex<EncodeCache>,
}

impl Tokenizer {
    /// Wrap a vocabulary with a fresh encode cache.
    pub fn new(vocab: Vocabulary) -> Self {
        Tokenizer {
            vocab,
            cache: Mutex::new(EncodeCache::new()),
        }
    }

    /// The underlying vocabulary.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Encode text to at most `max_length` token ids.
    pub fn encode(&self, text: &str, max_length: usize) -> Vec<u32> {
        if text.len() > CACHE_KEY_MAX_LEN {
            return self.encode_uncached(text, max_length);
        }
        let key = (text.to_string(), max_length);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(tokens) = cache.get(&key) {
                return tokens;
            }
        }
        let tokens = self.encode_uncached(text, max_length);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, tokens.clone());
        }
        tokens
    }

    fn encode_uncached(&self, text: &str, max_length: usize) -> Vec<u32> {
        let mut tokens = Vec::new();
        // Byte offsets of character boundaries, with the end offset last.
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());
        let n_chars = bounds.len() - 1;

        let mut pos = 0;
        while pos < n_chars && tokens.len() < max_length {
            let mut matched = false;
            let longest = MAX_MATCH_CHARS.min(n_chars - pos);
            for len in (1..=longest).rev() {
                let candidate = &text[bounds[pos]..bounds[pos + len]];
                if let Some(id) = self.vocab.id(candidate) {
                    tokens.push(id);
                    pos += len;
                    matched = true;
                    break;
                }
            }
            if !matched {
                tokens.push(UNK);
                pos += 1;
            }
        }

        tokens
    }

    /// Decode token ids back to text. `<pad>` is skipped; `<unk>` and
    /// out-of-range ids render as U+FFFD.
    pub fn decode(&self, tokens: &[u32]) -> String {
        let mut text = String::new();
        for &id in tokens {
            match id {
                PAD => {}
                UNK => text.push('\u{FFFD}'),
                _ => match self.vocab.token(id) {
                    Some(piece) => text.push_str(piece),
                    None => text.push('\u{FFFD}'),
                },
            }
        }
        text
    }
}
