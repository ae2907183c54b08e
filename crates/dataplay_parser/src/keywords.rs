/// Try to get a keyword from a string, ignoring string casing.
pub fn keyword_from_str(s: &str) -> Option<Keyword> {
    let s = unicase::Ascii::new(s);
    let idx = match KEYWORD_STRINGS.binary_search(&s) {
        Ok(idx) => idx,
        Err(_) => return None,
    };
    Some(ALL_KEYWORDS[idx])
}

/// Generate an enum of keywords.
///
/// Keywords must be listed in alphabetical order for the binary search in
/// `keyword_from_str` to work.
macro_rules! define_keywords {
    ($($ident:ident),*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($ident),*
        }

        pub const ALL_KEYWORDS: &'static [Keyword] = &[
            $(Keyword::$ident),*
        ];

        pub const KEYWORD_STRINGS: &'static [unicase::Ascii<&'static str>] = &[
            $(unicase::Ascii::new(stringify!($ident)),)*
        ];
    };
}

#[rustfmt::skip]
define_keywords!(
    ALL,
    AND,
    AS,
    ASC,
    BETWEEN,
    BY,
    CASE,
    DESC,
    DISTINCT,
    ELSE,
    END,
    FALSE,
    FIRST,
    FROM,
    GROUP,
    HAVING,
    IN,
    IS,
    LAST,
    LIKE,
    LIMIT,
    NOT,
    NULL,
    NULLS,
    OFFSET,
    OR,
    ORDER,
    SELECT,
    THEN,
    TRUE,
    WHEN,
    WHERE
);

/// Keywords that may also be used as unquoted identifiers.
pub const NON_RESERVED: &[Keyword] = &[
    Keyword::ASC,
    Keyword::DESC,
    Keyword::FIRST,
    Keyword::LAST,
    Keyword::NULLS,
];

impl Keyword {
    pub fn is_reserved(&self) -> bool {
        !NON_RESERVED.contains(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive() {
        // (input, expected)
        let tests = [
            ("select", Some(Keyword::SELECT)),
            ("SeLeCt", Some(Keyword::SELECT)),
            ("SELECT", Some(Keyword::SELECT)),
            ("NOSELECT", None),
            ("order", Some(Keyword::ORDER)),
            ("nulls", Some(Keyword::NULLS)),
            ("null", Some(Keyword::NULL)),
        ];

        for (input, expected) in tests {
            let got = keyword_from_str(input);
            assert_eq!(expected, got);
        }
    }

    #[test]
    fn keywords_sorted() {
        for pair in KEYWORD_STRINGS.windows(2) {
            assert!(pair[0] < pair[1], "{} not before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn every_keyword_resolves() {
        for (s, kw) in KEYWORD_STRINGS.iter().zip(ALL_KEYWORDS) {
            assert_eq!(Some(*kw), keyword_from_str(&s.to_string()));
        }
    }
}
