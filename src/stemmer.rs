//! Croatian token normalization for keyword indexing.
//!
//! Deterministic suffix/prefix stripper with two modes:
//! - **Aggressive** — shortest stems, used for FTS indexing where recall matters.
//! - **Conservative** — longer stems plus lemma normalization, used where
//!   precision matters.
//!
//! The algorithm applies, in order: an exception map for irregular forms,
//! repeated longest-first suffix stripping (subject to a minimum stem length),
//! a single prefix strip, consonant-alternation (voicing) normalization, and —
//! in conservative mode only — a lemma map.
//!
//! All functions are pure and thread-safe; stemming already-stemmed input
//! within the same mode is a fixed point.

/// Stemming mode. Aggressive strips more; conservative keeps stems readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StemMode {
    Aggressive,
    Conservative,
}

impl StemMode {
    pub fn parse(s: &str) -> StemMode {
        match s {
            "conservative" => StemMode::Conservative,
            _ => StemMode::Aggressive,
        }
    }
}

/// Suffix table for aggressive mode, ordered longest first within groups.
/// Iteration order matters: the first matching strippable suffix wins.
const SUFFIXES_AGGRESSIVE: &[&str] = &[
    "ovijega", "ovijemu", "ovijeg", "ovijem", "ovijim", "ovijih", "ovijoj", "ijega", "ijemu",
    "ijem", "ijih", "ijim", "ijog", "ijoj", "nijeg", "nijem", "nijih", "nijim", "nija", "nije",
    "niji", "niju", "asmo", "aste", "ahu", "ismo", "iste", "jesmo", "jeste", "jesu", "ajući",
    "ujući", "ivši", "avši", "jevši", "nuti", "iti", "ati", "eti", "uti", "ela", "ala", "alo",
    "ilo", "ili", "njak", "nost", "anje", "enje", "stvo", "ica", "ika", "ice", "ike", "jemu",
    "jega", "ama", "ima", "om", "em", "ev", "og", "eg", "im", "ih", "oj", "oh", "iš", "ov", "ši",
    "ga", "mu", "en", "ski", "jeh", "eš", "aš", "am", "osmo", "este", "oše", "a", "e", "i", "o",
    "u", "la", "lo", "li", "te", "mo", "je",
];

/// Suffix table for conservative mode (a strict subset of the aggressive one).
const SUFFIXES_CONSERVATIVE: &[&str] = &[
    "ovijega", "ovijemu", "ovijeg", "ovijem", "ovijim", "ovijih", "ovijoj", "ijega", "ijemu",
    "ijem", "ijih", "ijim", "ijog", "ijoj", "nijeg", "nijem", "nijih", "nijim", "nija", "nije",
    "niji", "niju", "asmo", "aste", "ahu", "ismo", "iste", "jesmo", "jeste", "jesu", "ajući",
    "ujući", "ivši", "avši", "nuti", "iti", "ati", "eti", "uti", "ela", "ala", "alo", "ilo",
    "ili", "njak", "nost", "anje", "enje", "stvo", "ica", "ika", "ice", "ike", "jemu", "jega",
    "ama", "ima", "om", "em", "og", "im", "ih", "oj", "oh", "iš", "ov", "ši", "ga", "mu", "a",
    "e", "i", "o", "u", "la", "lo", "li", "te", "mo",
];

const PREFIXES: &[&str] = &["naj", "pre", "iz", "na", "po", "do", "uz"];

/// Irregular forms resolved before any stripping.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("ljudi", "ljud"),
    ("osoba", "osoba"),
    ("psa", "pas"),
    ("psi", "pas"),
    ("oca", "otac"),
    ("očevi", "otac"),
    ("oči", "oko"),
    ("uši", "uho"),
    ("djeca", "dijete"),
    ("vrapca", "vrabac"),
    ("vrapci", "vrabac"),
];

/// Consonant-alternation normalization applied after stripping.
const VOICE_RULES: &[(&str, &str)] = &[
    ("učenic", "učenik"),
    ("majc", "majk"),
    ("ruc", "ruk"),
    ("ruz", "ruk"),
    ("noz", "nog"),
    ("knjiz", "knjig"),
    ("dječac", "dječak"),
    ("dus", "duh"),
    ("jezic", "jezik"),
    ("supruz", "suprug"),
    ("rekoš", "rek"),
    ("snjeg", "snijeg"),
    ("pjesnic", "pjesnik"),
    ("momc", "momak"),
    ("pekl", "pek"),
    ("gledal", "gled"),
    ("djetet", "djet"),
    ("pjes", "pjesm"),
    ("peć", "pek"),
    ("striž", "strig"),
    ("vuč", "vuk"),
    ("kaž", "kaz"),
    ("maš", "mah"),
    ("pij", "pi"),
    ("draž", "drag"),
    ("brž", "brz"),
    ("slađ", "slad"),
    ("vraz", "vrag"),
    ("siromas", "siromah"),
    ("skač", "skak"),
    ("svrs", "svrha"),
    ("vuc", "vuk"),
    ("oblac", "oblak"),
    ("viš", "vis"),
    ("bolj", "dobar"),
    ("jač", "jak"),
    ("već", "velik"),
    ("duž", "dug"),
    ("bjelj", "bijel"),
    ("gorč", "gork"),
    ("reć", "rek"),
    ("ora", "orl"),
    ("dijet", "djet"),
    ("tež", "teg"),
    ("sunc", "sunc"),
    ("vremen", "vremen"),
    ("djevojč", "djevojčic"),
    ("oras", "orah"),
    ("src", "src"),
    ("dra", "drag"),
    ("pečen", "pek"),
    ("rađen", "rad"),
    ("viđ", "vid"),
    ("momk", "momak"),
    ("vrapc", "vrab"),
    ("vidj", "vid"),
    ("ptič", "ptič"),
    ("snj", "snijeg"),
    ("hrvatsk", "hrvat"),
    ("mislima", "misao"),
    ("šalic", "šalic"),
    ("stručnj", "struč"),
    ("jest", "jed"),
    ("pit", "pi"),
    ("čut", "ču"),
    ("znat", "zna"),
    ("htj", "htje"),
    ("moć", "mog"),
    ("reč", "rek"),
    ("teč", "tek"),
    ("vrš", "vrh"),
    ("dobar", "dobr"),
    ("kratak", "kratk"),
    ("uzak", "uzk"),
    ("nizak", "nizk"),
    ("težak", "težk"),
    ("topao", "topl"),
    ("hladan", "hladn"),
    ("tjedn", "tjedan"),
    ("dvorc", "dvorac"),
    ("trenuc", "trenutak"),
    ("bitak", "bitka"),
    ("bajak", "bajka"),
    ("dasak", "daska"),
    ("djevojak", "djevojka"),
    ("momak", "momak"),
    ("top", "topl"),
    ("vidjev", "vid"),
    ("ljep", "lijep"),
    ("crv", "crven"),
    ("peč", "pek"),
    ("piš", "pis"),
    ("duš", "duh"),
    ("čovječ", "čovjek"),
    ("čovjec", "čovjek"),
];

/// Lemma normalization, conservative mode only.
const LEMMA_RULES: &[(&str, &str)] = &[
    ("majk", "majka"),
    ("ruk", "ruka"),
    ("nog", "noga"),
    ("knjig", "knjiga"),
    ("vrijem", "vrijeme"),
    ("djet", "dijete"),
    ("pjesm", "pjesma"),
    ("kuć", "kuća"),
    ("škol", "škola"),
    ("polj", "polje"),
    ("mor", "more"),
    ("sunc", "sunce"),
    ("dobr", "dobar"),
    ("sret", "sretan"),
    ("pamet", "pametan"),
    ("tužn", "tužan"),
    ("tuž", "tužan"),
    ("duž", "dug"),
    ("već", "velik"),
    ("manj", "malen"),
    ("bolj", "dobar"),
    ("lošij", "loš"),
    ("pis", "pisati"),
    ("vidj", "vidjeti"),
    ("vid", "vidjeti"),
    ("htje", "htjeti"),
    ("mog", "moći"),
    ("rek", "reći"),
    ("pek", "peći"),
];

fn lookup(table: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Can `suffix` be stripped from `root` in this mode?
fn is_suffix_strippable(suffix: &str, root: &str, mode: StemMode) -> bool {
    let root_len = root.chars().count();
    match mode {
        StemMode::Aggressive => {
            if matches!(suffix, "em" | "ov" | "ev") {
                return root_len >= 3;
            }
            if matches!(suffix, "en" | "ica" | "ice" | "ika" | "ike") {
                return root_len >= 4;
            }
            if suffix.chars().count() == 1 {
                return root_len >= 3;
            }
            root_len >= 2
        }
        StemMode::Conservative => root_len >= 3,
    }
}

/// Stem a single word. Non-alphabetic characters are dropped before stemming.
pub fn stem(word: &str, mode: StemMode) -> String {
    let word: String = word
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect();

    if word.is_empty() {
        return word;
    }

    if let Some(exception) = lookup(EXCEPTIONS, &word) {
        return exception.to_string();
    }

    let suffixes = match mode {
        StemMode::Aggressive => SUFFIXES_AGGRESSIVE,
        StemMode::Conservative => SUFFIXES_CONSERVATIVE,
    };

    let mut current = word;
    loop {
        let mut found = false;
        for suffix in suffixes {
            if let Some(root) = current.strip_suffix(suffix) {
                if is_suffix_strippable(suffix, root, mode) {
                    current = root.to_string();
                    found = true;
                    break;
                }
            }
        }
        if !found {
            break;
        }
    }

    for prefix in PREFIXES {
        if let Some(root) = current.strip_prefix(prefix) {
            if root.chars().count() >= 3 {
                current = root.to_string();
                break;
            }
        }
    }

    if let Some(voiced) = lookup(VOICE_RULES, &current) {
        current = voiced.to_string();
    }

    if mode == StemMode::Conservative {
        if let Some(lemma) = lookup(LEMMA_RULES, &current) {
            current = lemma.to_string();
        }
    }

    current
}

/// Stem whitespace-separated text, joining stems with single spaces.
pub fn stem_text(text: &str, mode: StemMode) -> String {
    text.split_whitespace()
        .map(|w| stem(w, mode))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
