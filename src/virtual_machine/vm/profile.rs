use crate::virtual_machine::isa::Category;

/// Number of categories tracked by [`ExecProfile`].
const CATEGORY_COUNT: usize = 8;

impl Category {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Stack => "Stack",
            Category::Arithmetic => "Arithmetic",
            Category::Logic => "Logic",
            Category::Control => "Control Flow",
            Category::Scope => "Variables",
            Category::Heap => "Heap",
            Category::Call => "Macro Calls",
            Category::Output => "Output",
        }
    }

    /// All categories in discriminant order.
    const ALL: [Category; CATEGORY_COUNT] = [
        Category::Stack,
        Category::Arithmetic,
        Category::Logic,
        Category::Control,
        Category::Scope,
        Category::Heap,
        Category::Call,
        Category::Output,
    ];
}

/// Executed instruction counts per [`Category`].
///
/// Backed by a flat array indexed by the category discriminant.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecProfile {
    counts: [u64; CATEGORY_COUNT],
}

impl ExecProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record(&mut self, category: Category) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(1);
    }

    pub fn count(&self, category: Category) -> u64 {
        self.counts[category as usize]
    }

    /// Total number of executed instructions.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    /// Returns an iterator over all categories and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (Category, u64)> {
        Category::ALL.into_iter().zip(self.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_per_category() {
        let mut profile = ExecProfile::new();
        profile.record(Category::Stack);
        profile.record(Category::Stack);
        profile.record(Category::Output);
        assert_eq!(profile.count(Category::Stack), 2);
        assert_eq!(profile.count(Category::Heap), 0);
        assert_eq!(profile.total(), 3);
    }

    #[test]
    fn iter_follows_discriminant_order() {
        let profile = ExecProfile::new();
        let names: Vec<_> = profile.iter().map(|(c, _)| c as u8).collect();
        assert_eq!(names, (0..CATEGORY_COUNT as u8).collect::<Vec<_>>());
    }
}
