use rustc_hash::FxHashMap;

pub type HashMap<K, V> = FxHashMap<K, V>;

pub type Shape = Vec<usize>;

pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}
