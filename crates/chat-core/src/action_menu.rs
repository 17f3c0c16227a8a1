/// Single-open per-message action menu.
///
/// Opening a menu closes any other; a pointer press outside the open menu
/// closes it. Only the sender's own messages get a menu, which is a UI rule
/// and not authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMenu {
    open: Option<String>,
}

impl ActionMenu {
    /// Message whose menu is open, if any.
    pub fn open_message_id(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Open the menu for `message_id`. Returns `true` when the open menu changed.
    pub fn open(&mut self, message_id: &str, is_self: bool) -> bool {
        if !is_self || self.open.as_deref() == Some(message_id) {
            return false;
        }
        self.open = Some(message_id.to_owned());
        true
    }

    /// Close whatever menu is open. Returns `true` when one was open.
    pub fn close(&mut self) -> bool {
        self.open.take().is_some()
    }

    /// Pointer pressed outside the open menu's region.
    pub fn pointer_outside(&mut self) -> bool {
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_second_menu_closes_first() {
        let mut menu = ActionMenu::default();
        assert!(menu.open("m-1", true));
        assert!(menu.open("m-2", true));
        assert_eq!(menu.open_message_id(), Some("m-2"));

        assert!(menu.pointer_outside());
        assert_eq!(menu.open_message_id(), None);
    }

    #[test]
    fn ignores_messages_from_other_senders() {
        let mut menu = ActionMenu::default();
        assert!(!menu.open("m-9", false));
        assert_eq!(menu.open_message_id(), None);
    }

    #[test]
    fn reopening_same_menu_is_not_a_change() {
        let mut menu = ActionMenu::default();
        menu.open("m-1", true);
        assert!(!menu.open("m-1", true));
    }

    #[test]
    fn pointer_outside_without_open_menu_is_not_a_change() {
        let mut menu = ActionMenu::default();
        assert!(!menu.pointer_outside());
    }
}
