#[derive(Debug)]
pub struct DelayBuffer<T> {
    slots: Vec<Vec<T>>,
    current_slot: usize,
}

impl<T: Clone> DelayBuffer<T> {
    pub fn new(horizon: usize) -> DelayBuffer<T> {
        DelayBuffer {
            slots: vec![Vec::new(); horizon.max(1)],
            current_slot: 0,
        }
    }

    pub fn schedule(&mut self, offset: usize, value: T) {
        debug_assert!(offset < self.slots.len());

        let target_slot = self.slot_at_offset(offset);
        self.slots[target_slot].push(value);
    }

    fn slot_at_offset(&self, offset: usize) -> usize {
        (self.current_slot + offset) % self.slots.len()
    }

    pub fn take_due(&mut self) -> impl Iterator<Item = T> + '_ {
        let slot = self.current_slot;
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        self.slots[slot].drain(..)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(Vec::clear);
        self.current_slot = 0;
    }
}

#[cfg(test)]
mod tests {

    use super::DelayBuffer;
    use itertools::assert_equal;
    use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};

    const EMPTY: [usize; 0] = [];

    #[test]
    fn empty() {
        let mut sut: DelayBuffer<usize> = DelayBuffer::new(4);
        for _ in 0..5 {
            assert_equal(sut.take_due(), EMPTY);
        }
    }

    #[test]
    fn event_comes_due_after_offset() {
        let mut sut: DelayBuffer<usize> = DelayBuffer::new(4);
        sut.schedule(2, 7);
        assert_equal(sut.take_due(), EMPTY);
        assert_equal(sut.take_due(), EMPTY);
        assert_equal(sut.take_due(), [7]);
        for _ in 0..4 {
            assert_equal(sut.take_due(), EMPTY);
        }
    }

    #[test]
    fn wraps_around() {
        let mut sut: DelayBuffer<usize> = DelayBuffer::new(3);

        for step in 0..10 {
            sut.schedule(2, step);
            let due: Vec<_> = sut.take_due().collect();
            if step >= 2 {
                assert_eq!(due, vec![step - 2]);
            } else {
                assert!(due.is_empty());
            }
        }
    }

    #[test]
    fn clear_drops_pending_events() {
        let mut sut: DelayBuffer<usize> = DelayBuffer::new(5);
        sut.schedule(1, 1);
        sut.schedule(4, 2);
        assert_equal(sut.take_due(), EMPTY);

        sut.clear();
        for _ in 0..5 {
            assert_equal(sut.take_due(), EMPTY);
        }
    }

    #[test]
    fn randomized_schedule() {
        let mut sut: DelayBuffer<i32> = DelayBuffer::new(8);
        const NUM_STEPS: usize = 97;
        let mut expected = vec![Vec::<i32>::new(); NUM_STEPS];
        let mut rng = StdRng::seed_from_u64(0);
        let amount_dist = Uniform::from(0..6);
        let offset_dist = Uniform::from(1..8);
        let value_dist = Uniform::from(-500..500);

        for step in 0..NUM_STEPS {
            for _ in 0..amount_dist.sample(&mut rng) {
                let offset = offset_dist.sample(&mut rng);
                let value = value_dist.sample(&mut rng);
                sut.schedule(offset, value);
                if step + offset < NUM_STEPS {
                    expected[step + offset].push(value);
                }
            }

            assert!(sut.take_due().eq(expected[step].drain(..)));
        }
    }
}
