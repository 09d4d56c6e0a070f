use rand::{Rng, rngs::StdRng};

#[derive(Debug, Clone)]
pub struct Experience {
    pub state: Vec<f32>,
    pub action: u32,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub terminated: bool,
}

/// Fixed capacity ring buffer, oldest experience overwritten first.
#[derive(Debug)]
pub struct ReplayBuffer {
    experiences: Vec<Experience>,
    capacity: usize,
    index: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            experiences: Vec::with_capacity(capacity.min(4096)),
            capacity,
            index: 0,
        }
    }

    pub fn add(&mut self, experience: Experience) {
        if self.experiences.len() < self.capacity {
            self.experiences.push(experience);
        } else {
            self.experiences[self.index] = experience;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    /// Uniform sample with replacement.
    pub fn sample<'a>(&'a self, batch_size: usize, rng: &mut StdRng) -> Vec<&'a Experience> {
        (0..batch_size)
            .map(|_| &self.experiences[rng.random_range(0..self.experiences.len())])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn experience(reward: f32) -> Experience {
        Experience {
            state: vec![0.],
            action: 0,
            reward,
            next_state: vec![0.],
            terminated: false,
        }
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut buffer = ReplayBuffer::new(2);
        for reward in [1., 2., 3.] {
            buffer.add(experience(reward));
        }
        assert_eq!(buffer.len(), 2);
        let rewards: Vec<_> = buffer.experiences.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, [3., 2.]);
    }
}
