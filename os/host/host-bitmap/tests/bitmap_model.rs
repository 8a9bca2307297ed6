use host_bitmap::AllocationBitmap;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Set(usize),
    Clear(usize),
    SetRange(usize, usize),
    ClearRange(usize, usize),
    Resize(usize),
    FindClearAndSet(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..160usize).prop_map(Op::Set),
        (0..160usize).prop_map(Op::Clear),
        (0..160usize, 0..80usize).prop_map(|(s, c)| Op::SetRange(s, c)),
        (0..160usize, 0..80usize).prop_map(|(s, c)| Op::ClearRange(s, c)),
        (0..160usize).prop_map(Op::Resize),
        (1..12usize, 0..160usize).prop_map(|(q, h)| Op::FindClearAndSet(q, h)),
    ]
}

/// Lowest start of a run of `quantity` equal bits, trying `hint` first.
fn model_find(model: &[bool], quantity: usize, hint: usize, value: bool) -> Option<usize> {
    let fits = |s: usize| s + quantity <= model.len() && model[s..s + quantity].iter().all(|&b| b == value);
    let hint = if hint >= model.len() { 0 } else { hint };
    (hint..model.len())
        .find(|&s| fits(s))
        .or_else(|| (0..hint).find(|&s| fits(s)))
}

proptest! {
    #[test]
    fn bitmap_matches_vec_bool_model(initial in 0..160usize, ops in proptest::collection::vec(op(), 1..60)) {
        let mut bitmap = AllocationBitmap::new(initial);
        let mut model = vec![false; initial];

        for op in ops {
            match op {
                Op::Set(b) => {
                    bitmap.set(b);
                    if let Some(m) = model.get_mut(b) { *m = true; }
                }
                Op::Clear(b) => {
                    bitmap.clear(b);
                    if let Some(m) = model.get_mut(b) { *m = false; }
                }
                Op::SetRange(s, c) => {
                    bitmap.set_range(s, c);
                    for m in model.iter_mut().skip(s).take(c) { *m = true; }
                }
                Op::ClearRange(s, c) => {
                    bitmap.clear_range(s, c);
                    for m in model.iter_mut().skip(s).take(c) { *m = false; }
                }
                Op::Resize(n) => {
                    bitmap.resize(n);
                    model.resize(n, false);
                }
                Op::FindClearAndSet(q, h) => {
                    let expected = model_find(&model, q, h, false);
                    prop_assert_eq!(bitmap.find_clear_and_set(q, h), expected);
                    if let Some(s) = expected {
                        for m in &mut model[s..s + q] { *m = true; }
                    }
                }
            }

            prop_assert_eq!(bitmap.size(), model.len());
            for (i, &m) in model.iter().enumerate() {
                prop_assert_eq!(bitmap.test(i), m);
            }
            prop_assert_eq!(bitmap.count_set(), model.iter().filter(|&&b| b).count());
            prop_assert_eq!(bitmap.is_empty(), !model.contains(&true));
        }
    }

    #[test]
    fn range_queries_match_model(bits in proptest::collection::vec(any::<bool>(), 1..140), start in 0..150usize, count in 0..40usize) {
        let mut bitmap = AllocationBitmap::new(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            if b { bitmap.set(i); }
        }

        let inside = count > 0 && start + count <= bits.len();
        let all = |v: bool| inside && bits[start..start + count].iter().all(|&b| b == v);
        prop_assert_eq!(bitmap.are_bits_set(start, count), all(true));
        prop_assert_eq!(bitmap.are_bits_clear(start, count), all(false));

        if count > 0 {
            prop_assert_eq!(bitmap.find_set(count, start), model_find(&bits, count, start, true));
            prop_assert_eq!(bitmap.find_clear(count, start), model_find(&bits, count, start, false));
        }

        let mut rebuilt = vec![false; bits.len()];
        for run in bitmap.set_runs() {
            prop_assert!(!run.is_empty());
            for m in &mut rebuilt[run] { *m = true; }
        }
        prop_assert_eq!(rebuilt, bits);
    }
}
