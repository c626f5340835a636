#[test]
fn is_usable_in_const_contexts() {
    const _ALLOCATOR1: segfit_alloc::Allocator<64> = segfit_alloc::Allocator::new();
    static _ALLOCATOR2: segfit_alloc::Allocator<64> = segfit_alloc::Allocator::new();
}

#[test]
fn supports_global_alloc() {
    fn assert<T: core::alloc::GlobalAlloc>(_: T) {}
    assert(segfit_alloc::Allocator::<64>::new())
}

#[test]
#[should_panic(expected = "too small heap memory")]
fn min_heap_size_must_fit_a_prologue_epilogue_and_one_block() {
    let _allocator = segfit_alloc::Allocator::<4>::new(); // panic here
}

#[test]
fn odd_heap_sizes_are_accepted() {
    // Unlike a fixed-word-size design, this allocator only needs the arena
    // to be large enough, not a multiple of anything in particular.
    let _allocator = segfit_alloc::Allocator::<97>::new();
}
