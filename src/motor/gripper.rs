// Gripper and limit-switch collaborators

/// Parallel lever gripper driven by a hobby servo
pub trait Gripper {
    fn open(&mut self);
    fn close(&mut self);
    fn is_open(&self) -> bool;

    /// True once the servo has had time to reach the commanded jaw position
    fn settled(&self) -> bool;

    fn set_open(&mut self, open: bool) {
        if open {
            self.open();
        } else {
            self.close();
        }
    }

    /// Flip the jaw state; returns the new open state
    fn toggle(&mut self) -> bool {
        let open = !self.is_open();
        self.set_open(open);
        open
    }
}

/// Debounced limit switch at the bottom of the slide
pub trait LimitSwitch {
    fn triggered(&mut self) -> bool;
}
