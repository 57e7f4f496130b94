pub use internal::*;

#[cfg(target_arch = "wasm32")]
mod internal {
    pub fn par_rows_mut<T: Send + Sync, F: Fn(usize, &mut [T]) + Send + Sync>(
        data: &mut [T],
        row_len: usize,
        f: F,
    ) {
        data.chunks_mut(row_len).enumerate().for_each(|(row, values)| {
            f(row, values);
        });
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod internal {
    use rayon::prelude::*;

    /// Calls `f` once per row of `data`, rows in parallel.
    pub fn par_rows_mut<T: Send + Sync, F: Fn(usize, &mut [T]) + Send + Sync>(
        data: &mut [T],
        row_len: usize,
        f: F,
    ) {
        data.par_chunks_mut(row_len).enumerate().for_each(|(row, values)| {
            f(row, values);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_visited_once() {
        let mut data = vec![0usize; 12];
        par_rows_mut(&mut data, 4, |row, values| {
            for (i, v) in values.iter_mut().enumerate() {
                *v += row * 4 + i;
            }
        });
        assert_eq!(data, (0..12).collect::<Vec<_>>());
    }
}
