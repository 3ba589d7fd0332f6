pub const ENGLISH: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

pub const PORTUGUESE: &[&str] = &[
    "de", "a", "o", "que", "e", "do", "da", "em", "um", "para", "com", "não", "uma", "os", "no", "se", "na", "por",
    "mais", "as", "dos", "como", "mas", "ao", "ele", "das", "à", "seu", "sua", "ou", "quando", "muito", "nos", "já",
    "eu", "também", "só", "pelo", "pela", "até", "isso", "ela", "entre", "depois", "sem", "mesmo", "aos", "seus",
    "quem", "nas", "me", "esse", "eles", "você", "essa", "num", "nem", "suas", "meu", "às", "minha", "numa", "pelos",
    "elas", "qual", "nós", "lhe", "deles", "essas", "esses", "pelas", "este", "dele", "tu", "te", "vocês", "vos",
    "lhes", "meus", "minhas", "teu", "tua", "teus", "tuas", "nosso", "nossa", "nossos", "nossas", "dela", "delas",
    "esta", "estes", "estas", "aquele", "aquela", "aqueles", "aquelas", "isto", "aquilo", "estou", "está", "estamos",
    "estão", "era", "eram", "foi", "foram", "há", "ser", "sido", "é", "são", "ter", "tem", "têm", "tinha", "havia",
];

/// Both lists: the corpus mixes Portuguese statutes with English material.
pub fn default_set() -> impl Iterator<Item = String> {
    ENGLISH.iter().chain(PORTUGUESE.iter()).map(|s| (*s).to_string())
}
