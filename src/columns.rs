use crate::table::Table;

impl Table {
    /// Appends `name` with `default` in every row. Returns false when the column exists.
    pub fn add_column(&mut self, name: &str, default: &str) -> bool {
        if self.column_index(name).is_some() {
            return false;
        }
        let width = self.width();
        for row in &mut self.rows {
            row.resize(width, String::new());
            row.push(default.to_string());
        }
        self.header.push(name.to_string());
        true
    }

    /// Removes the dynamic column called `name`, returning its former index.
    pub fn remove_column(&mut self, name: &str) -> Option<usize> {
        self.remove_column_where(|h| h == name).map(|(idx, _)| idx)
    }

    /// Removes the first dynamic column whose name matches `pred`.
    ///
    /// Rows narrower than the header are treated as already lacking the
    /// column and keep their cells.
    pub fn remove_column_where<F>(&mut self, pred: F) -> Option<(usize, String)>
    where
        F: Fn(&str) -> bool,
    {
        let fixed = self.fixed_width();
        let idx = self
            .header
            .iter()
            .enumerate()
            .skip(fixed)
            .find(|(_, h)| pred(h))
            .map(|(i, _)| i)?;

        let width = self.width();
        let name = self.header.remove(idx);
        for row in &mut self.rows {
            if row.len() >= width {
                row.remove(idx);
            }
        }
        Some((idx, name))
    }

    /// Renames the first dynamic column matching `pred`. Cells are untouched.
    pub fn rename_column_where<F>(&mut self, pred: F, new_name: &str) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let fixed = self.fixed_width();
        let idx = (fixed..self.header.len()).find(|&i| pred(&self.header[i]))?;
        if self.header[idx] == new_name {
            return Some(new_name.to_string());
        }
        if self.column_index(new_name).is_some() {
            return None;
        }
        Some(std::mem::replace(&mut self.header[idx], new_name.to_string()))
    }
}
