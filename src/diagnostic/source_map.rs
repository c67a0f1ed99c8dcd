/// Line and column lookup for byte offsets into one source text.
pub struct SourceMap<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceMap<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { source, line_starts }
    }

    /// 1-based (line, column). Columns count characters, not bytes.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.source.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let start = self.line_starts[line];
        let col = self.source.get(start..offset).map_or(offset - start, |s| s.chars().count());
        (line + 1, col + 1)
    }

    /// Text of a 1-based line without its line terminator.
    pub fn line(&self, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).map_or(self.source.len(), |next| next - 1);
        self.source[start..end].trim_end_matches('\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let map = SourceMap::new("(+ 1 2)");
        assert_eq!(map.line_col(0), (1, 1));
        assert_eq!(map.line_col(3), (1, 4));
        assert_eq!(map.line_col(7), (1, 8));
    }

    #[test]
    fn multi_line() {
        let src = "(define a 1)\n(car a)\r\n\n";
        let map = SourceMap::new(src);
        assert_eq!(map.line_col(12), (1, 13));
        assert_eq!(map.line_col(13), (2, 1));
        assert_eq!(map.line_col(18), (2, 6));
        assert_eq!(map.line(1), "(define a 1)");
        assert_eq!(map.line(2), "(car a)");
        assert_eq!(map.line(3), "");
        assert_eq!(map.line(9), "");
    }

    #[test]
    fn columns_count_characters() {
        let map = SourceMap::new("(display \"λx\") )");
        assert_eq!(map.line_col(16), (1, 16));
    }
}
