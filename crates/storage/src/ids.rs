use std::fmt;

use uuid::Uuid;

// One macro for every id wrapper so conversation and message ids behave the same.
macro_rules! define_store_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Mints a time-ordered id.
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

define_store_id!(ConversationId);
define_store_id!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        let first = ConversationId::new_v7();
        let second = ConversationId::new_v7();
        assert_ne!(first, second);
    }

    #[test]
    fn display_is_hyphenated_uuid() {
        let rendered = MessageId::new_v7().to_string();
        assert_eq!(rendered.len(), 36);
        assert_eq!(rendered.matches('-').count(), 4);
    }
}
